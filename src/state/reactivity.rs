// ============================================================================
// REACTIVITY - Sistema de notificaciones/subscribers para reactividad
// ============================================================================

use std::cell::RefCell;
use std::rc::Rc;

type Listener<E> = Rc<dyn Fn(&E)>;

/// Lista de subscribers de un tipo de evento.
/// Se notifica sobre una copia de la lista: un listener puede suscribir a
/// otros o emitir de nuevo sin provocar un doble préstamo.
pub struct EventBus<E> {
    listeners: RefCell<Vec<Listener<E>>>,
}

impl<E> EventBus<E> {
    pub fn new() -> Self {
        Self {
            listeners: RefCell::new(Vec::new()),
        }
    }

    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&E) + 'static,
    {
        self.listeners.borrow_mut().push(Rc::new(listener));
    }

    pub fn emit(&self, event: &E) {
        let listeners: Vec<Listener<E>> = self.listeners.borrow().clone();
        for listener in listeners {
            listener(event);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Estado reactivo: guarda un valor y notifica a los subscribers al cambiar
pub struct ReactiveState<T> {
    value: RefCell<T>,
    changes: EventBus<T>,
}

impl<T: Clone + PartialEq> ReactiveState<T> {
    pub fn new(value: T) -> Self {
        Self {
            value: RefCell::new(value),
            changes: EventBus::new(),
        }
    }

    pub fn get(&self) -> T {
        self.value.borrow().clone()
    }

    /// Devuelve `true` si el valor cambió (y se notificó)
    pub fn set(&self, new_value: T) -> bool {
        if *self.value.borrow() == new_value {
            return false;
        }
        *self.value.borrow_mut() = new_value.clone();
        self.changes.emit(&new_value);
        true
    }

    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&T) + 'static,
    {
        self.changes.subscribe(listener);
    }
}
