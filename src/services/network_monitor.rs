// ============================================================================
// MONITOR DE CONECTIVIDAD
// ============================================================================
// Combina dos señales independientes: el enlace de red (eventos
// online/offline del navegador) y la alcanzabilidad del servidor (probe
// periódico). Emite `Reconnected` solo al entrar en `Online`.
// ============================================================================

use std::cell::Cell;
use std::rc::{Rc, Weak};
use std::time::Duration;

use crate::models::{ConnectivityEvent, ConnectivityState};
use crate::services::api_client::EntityApi;
use crate::state::EventBus;
use crate::utils::runtime::{self, with_timeout};

pub struct ConnectivityMonitor {
    link_up: Cell<bool>,
    /// Resultado del último probe (se conserva mientras no hay enlace)
    server_reachable: Cell<bool>,
    state: Cell<ConnectivityState>,
    probe_in_flight: Cell<bool>,
    probing: Cell<bool>,
    /// Cambia en cada `stop_probing`: un bucle de una generación anterior
    /// termina al despertar aunque se haya vuelto a arrancar
    probe_generation: Cell<u64>,
    events: EventBus<ConnectivityEvent>,
}

impl ConnectivityMonitor {
    /// Con enlace, el servidor se considera caído hasta el primer probe
    /// exitoso: así el arranque siempre emite `Reconnected` y drena la queue
    pub fn new(link_up: bool) -> Self {
        let state = if link_up {
            ConnectivityState::ServerDown
        } else {
            ConnectivityState::NetworkDown
        };

        Self {
            link_up: Cell::new(link_up),
            server_reachable: Cell::new(false),
            state: Cell::new(state),
            probe_in_flight: Cell::new(false),
            probing: Cell::new(false),
            probe_generation: Cell::new(0),
            events: EventBus::new(),
        }
    }

    pub fn state(&self) -> ConnectivityState {
        self.state.get()
    }

    pub fn is_online(&self) -> bool {
        self.state() == ConnectivityState::Online
    }

    pub fn is_link_up(&self) -> bool {
        self.link_up.get()
    }

    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&ConnectivityEvent) + 'static,
    {
        self.events.subscribe(listener);
    }

    /// Señal del enlace de red (eventos `online`/`offline`)
    pub fn set_link_up(&self, up: bool) -> ConnectivityState {
        if up {
            log::info!("🌐 Network: ONLINE");
        } else {
            log::warn!("📴 Network: OFFLINE");
        }
        self.link_up.set(up);
        self.recompute()
    }

    /// Registra el resultado de un probe. Se ignora sin enlace: no tiene
    /// sentido evaluar el servidor si la red está caída
    pub fn record_probe(&self, reachable: bool) -> ConnectivityState {
        if !self.link_up.get() {
            return self.state();
        }
        self.server_reachable.set(reachable);
        self.recompute()
    }

    /// Un envío directo o una réplica falló de forma transitoria
    pub fn report_server_unreachable(&self) -> ConnectivityState {
        log::warn!("⚠️ Servidor inalcanzable (fallo transitorio)");
        self.record_probe(false)
    }

    /// Un único probe con timeout. Cualquier fallo (DNS, timeout, abort,
    /// status no-2xx) equivale a servidor caído; nunca se propaga
    pub async fn probe_once(&self, api: &dyn EntityApi, timeout: Duration) -> ConnectivityState {
        if !self.link_up.get() {
            return self.state();
        }
        if self.probe_in_flight.replace(true) {
            log::debug!("🔎 Probe ya en curso, ignorando");
            return self.state();
        }

        let reachable = match with_timeout(timeout, api.health()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                log::info!("🔎 Probe fallido: {}", e);
                false
            }
            Err(elapsed) => {
                log::info!("🔎 Probe sin respuesta: {}", elapsed);
                false
            }
        };

        self.probe_in_flight.set(false);
        self.record_probe(reachable)
    }

    /// Inicia el probe periódico. Solo se registra una vez; el bucle guarda
    /// una referencia débil y termina al soltar el monitor o con `stop_probing`
    pub fn start_probing(
        self: &Rc<Self>,
        api: Rc<dyn EntityApi>,
        interval: Duration,
        timeout: Duration,
    ) {
        if self.probing.replace(true) {
            log::warn!("⚠️ ConnectivityMonitor: start_probing ya fue llamado, ignorando llamada duplicada");
            return;
        }
        let generation = self.probe_generation.get();

        let weak: Weak<Self> = Rc::downgrade(self);
        runtime::spawn_local(async move {
            loop {
                let monitor = match weak.upgrade() {
                    Some(m) if m.probe_generation.get() == generation => m,
                    _ => break,
                };
                monitor.probe_once(api.as_ref(), timeout).await;
                drop(monitor);
                runtime::sleep(interval).await;
            }
            log::info!("🔌 Probe periódico detenido");
        });

        log::info!("✅ Probe periódico cada {}s (timeout {}s)", interval.as_secs(), timeout.as_secs());
    }

    pub fn stop_probing(&self) {
        if self.probing.replace(false) {
            self.probe_generation.set(self.probe_generation.get() + 1);
        }
    }

    fn recompute(&self) -> ConnectivityState {
        let next = if !self.link_up.get() {
            ConnectivityState::NetworkDown
        } else if !self.server_reachable.get() {
            ConnectivityState::ServerDown
        } else {
            ConnectivityState::Online
        };

        let previous = self.state.replace(next);
        if previous != next {
            log::info!("🔄 Conectividad: {} → {}", previous, next);
            self.events.emit(&ConnectivityEvent::StateChanged {
                from: previous,
                to: next,
            });
            if next == ConnectivityState::Online {
                self.events.emit(&ConnectivityEvent::Reconnected);
            }
        }
        next
    }
}

impl Drop for ConnectivityMonitor {
    fn drop(&mut self) {
        log::info!("🔌 Connectivity monitor dropped");
    }
}
