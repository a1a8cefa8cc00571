use chrono::Utc;
use common::model::entity::{task_log, TaskLogColumn, TaskLogEntity};
use common::model::TaskStatus;
use log::{error, info, warn};
use sea_orm::sea_query::Expr;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use tokio::sync::mpsc;

const WRITE_BUFFER: usize = 1024;

#[derive(Debug)]
enum AuditOp {
    Created {
        trace_id: String,
        user_id: String,
        gallery_id: String,
        gallery_key: String,
        force: bool,
        free_tier: bool,
        estimated_gp: i64,
    },
    Completed {
        trace_id: String,
        node_id: String,
        actual_gp: i64,
    },
}

/// Fire-and-forget audit sink.
///
/// Writes go through a buffered channel into a single background worker, so
/// the request pipeline never blocks on SQL. Rows may lag Redis state; a
/// full buffer drops the row with a warning.
pub struct AuditStore {
    tx: mpsc::Sender<AuditOp>,
}

impl AuditStore {
    pub fn new(db: DatabaseConnection) -> Self {
        let (tx, rx) = mpsc::channel(WRITE_BUFFER);
        tokio::spawn(write_worker(db, rx));
        AuditStore { tx }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn log_task_created(
        &self,
        trace_id: &str,
        user_id: &str,
        gallery_id: &str,
        gallery_key: &str,
        force: bool,
        free_tier: bool,
        estimated_gp: i64,
    ) {
        self.enqueue(AuditOp::Created {
            trace_id: trace_id.to_string(),
            user_id: user_id.to_string(),
            gallery_id: gallery_id.to_string(),
            gallery_key: gallery_key.to_string(),
            force,
            free_tier,
            estimated_gp,
        });
    }

    pub fn log_task_completed(&self, trace_id: &str, node_id: &str, actual_gp: i64) {
        self.enqueue(AuditOp::Completed {
            trace_id: trace_id.to_string(),
            node_id: node_id.to_string(),
            actual_gp,
        });
    }

    fn enqueue(&self, op: AuditOp) {
        if self.tx.try_send(op).is_err() {
            warn!("[store] audit buffer full, dropping row");
        }
    }
}

async fn write_worker(db: DatabaseConnection, mut rx: mpsc::Receiver<AuditOp>) {
    while let Some(op) = rx.recv().await {
        match op {
            AuditOp::Created {
                trace_id,
                user_id,
                gallery_id,
                gallery_key,
                force,
                free_tier,
                estimated_gp,
            } => {
                let row = task_log::ActiveModel {
                    trace_id: Set(trace_id),
                    user_id: Set(user_id),
                    gallery_id: Set(gallery_id),
                    gallery_key: Set(gallery_key),
                    node_id: Set(None),
                    status: Set(TaskStatus::Pending.as_str().to_string()),
                    force: Set(force),
                    free_tier: Set(free_tier),
                    estimated_gp: Set(estimated_gp),
                    actual_gp: Set(0),
                    created_at: Set(Utc::now().naive_utc()),
                    finished_at: Set(None),
                };
                if let Err(e) = row.insert(&db).await {
                    error!("[store] log task created error: {e}");
                }
            }
            AuditOp::Completed {
                trace_id,
                node_id,
                actual_gp,
            } => {
                let result = TaskLogEntity::update_many()
                    .col_expr(
                        TaskLogColumn::Status,
                        Expr::value(TaskStatus::Completed.as_str()),
                    )
                    .col_expr(TaskLogColumn::NodeId, Expr::value(Some(node_id)))
                    .col_expr(TaskLogColumn::ActualGp, Expr::value(actual_gp))
                    .col_expr(
                        TaskLogColumn::FinishedAt,
                        Expr::value(Some(Utc::now().naive_utc())),
                    )
                    .filter(TaskLogColumn::TraceId.eq(trace_id))
                    .exec(&db)
                    .await;
                if let Err(e) = result {
                    error!("[store] log task completed error: {e}");
                }
            }
        }
    }
    info!("[store] audit writer stopped");
}
