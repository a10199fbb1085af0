// ============================================================================
// DIVERGENCE RECONCILER - Barrido "gana la copia local"
// ============================================================================
// Recorre el mirror y compara cada entidad sin operación pendiente con la
// versión del servidor: si falta la crea, si difiere la sobrescribe.
// Una petición por entidad: coste O(n) por reconexión.
// ============================================================================

use std::time::Duration;

use crate::error::{ApiError, FailureClass};
use crate::models::{Entity, SweepReport, SyncWarning};
use crate::services::api_client::EntityApi;
use crate::services::cache_service::LocalMirror;
use crate::services::offline_service::OperationQueue;
use crate::services::sync_service::request_with_timeout;

/// Qué pasó con una entidad del barrido
enum EntityOutcome {
    Created(Entity),
    Updated(Entity),
    Unchanged,
    Skipped,
}

pub struct DivergenceReconciler {
    request_timeout: Duration,
    warn_threshold: usize,
}

impl DivergenceReconciler {
    pub fn new(request_timeout: Duration, warn_threshold: usize) -> Self {
        Self {
            request_timeout,
            warn_threshold,
        }
    }

    /// Un barrido completo. Se detiene en el primer fallo transitorio o de
    /// autenticación; los rechazos permanentes se avisan y se sigue
    pub async fn sweep(
        &self,
        api: &dyn EntityApi,
        queue: &OperationQueue,
        mirror: &LocalMirror,
    ) -> SweepReport {
        let mut report = SweepReport::default();
        let ids: Vec<_> = mirror.entities().into_iter().map(|e| e.id).collect();

        if ids.len() > self.warn_threshold {
            report.warnings.push(SyncWarning::LargeCollection { entities: ids.len() });
        }
        log::info!("🔍 Barrido de divergencias: {} entidades", ids.len());

        for id in ids {
            // La queue resuelve las entidades con operación pendiente
            if queue.has_pending_for(&id) {
                report.skipped += 1;
                continue;
            }
            // Se relee: pudo borrarse o editarse mientras se esperaba la red
            let local = match mirror.get(&id) {
                Some(local) => local,
                None => {
                    report.skipped += 1;
                    continue;
                }
            };
            report.examined += 1;

            match self.reconcile_entity(api, &local, mirror.is_truncated(&id)).await {
                Ok(EntityOutcome::Created(server)) => {
                    report.created += 1;
                    Self::merge(queue, mirror, server);
                }
                Ok(EntityOutcome::Updated(server)) => {
                    report.updated += 1;
                    Self::merge(queue, mirror, server);
                }
                Ok(EntityOutcome::Unchanged) => report.unchanged += 1,
                Ok(EntityOutcome::Skipped) => report.skipped += 1,
                Err(error) => match error.class() {
                    FailureClass::Permanent => {
                        log::warn!("⚠️ Copia local de {} rechazada: {}", id, error);
                        report.warnings.push(SyncWarning::PushRejected {
                            entity_id: id.clone(),
                            reason: error.to_string(),
                        });
                    }
                    FailureClass::Auth => {
                        report.warnings.push(SyncWarning::SessionExpired);
                        report.stopped_by = Some(error);
                        break;
                    }
                    FailureClass::Transient => {
                        log::warn!("⏸️ Barrido detenido en {}: {}", id, error);
                        report.stopped_by = Some(error);
                        break;
                    }
                },
            }
        }

        log::info!(
            "🔍 Barrido: {} creadas, {} actualizadas, {} iguales, {} omitidas",
            report.created,
            report.updated,
            report.unchanged,
            report.skipped
        );
        report
    }

    async fn reconcile_entity(
        &self,
        api: &dyn EntityApi,
        local: &Entity,
        truncated: bool,
    ) -> Result<EntityOutcome, ApiError> {
        let server = request_with_timeout(self.request_timeout, api.fetch(&local.id)).await?;

        match server {
            None => {
                log::info!("📤 {} no existe en el servidor, se crea", local.id);
                let created = request_with_timeout(self.request_timeout, api.create(local)).await?;
                Ok(EntityOutcome::Created(created))
            }
            Some(server) if local.same_content_as(&server) => Ok(EntityOutcome::Unchanged),
            // Una copia truncada solo tiene los campos mínimos: subirla
            // borraría en el servidor los que faltan
            Some(_) if truncated => {
                log::info!("⏭️ {} difiere pero la copia local está truncada, no se sube", local.id);
                Ok(EntityOutcome::Skipped)
            }
            Some(_) => {
                log::info!("📤 {} difiere del servidor, gana la copia local", local.id);
                let updated = request_with_timeout(
                    self.request_timeout,
                    api.update(&local.id, &local.fields),
                )
                .await?;
                Ok(EntityOutcome::Updated(updated))
            }
        }
    }

    fn merge(queue: &OperationQueue, mirror: &LocalMirror, server: Entity) {
        if !queue.has_pending_for(&server.id) && mirror.contains(&server.id) {
            mirror.merge_confirmed(server);
        }
    }
}
