//! Order write pipeline. Every insert or update runs the registered hooks
//! inside the same SQLite transaction as the write.
use crate::db::{self, Pool};
use crate::model::{Order, OrderStatus};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use sqlx::SqliteConnection;
use std::sync::Arc;
use tracing::{info, instrument};

/// Values a hook carries from `before_write` to `after_write` of one write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteContext {
    /// Status persisted before this write; `None` for a new order.
    pub previous_status: Option<OrderStatus>,
}

#[async_trait]
pub trait OrderWriteHook: Send + Sync {
    /// Runs before the row is written. Errors abort the write.
    async fn before_write(&self, conn: &mut SqliteConnection, order: &Order)
        -> Result<WriteContext>;

    /// Runs after the row is written, before commit. Must not fail the write.
    async fn after_write(
        &self,
        conn: &mut SqliteConnection,
        order: &Order,
        created: bool,
        ctx: WriteContext,
    );
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveOutcome {
    pub id: i64,
    pub created: bool,
}

#[derive(Clone)]
pub struct OrderStore {
    pool: Pool,
    hooks: Vec<Arc<dyn OrderWriteHook>>,
}

impl OrderStore {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            hooks: Vec::new(),
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn OrderWriteHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Insert (`order.id == None`) or update the order. On insert the new id
    /// is written back into `order.id`.
    #[instrument(skip_all, fields(order_number = %order.order_number))]
    pub async fn save(&self, order: &mut Order) -> Result<SaveOutcome> {
        let mut tx = self.pool.begin().await?;
        let created = order.id.is_none();

        if let Some(id) = order.id {
            if !db::claim_order_row(&mut tx, id).await? {
                return Err(anyhow!("order {} not found", id));
            }
        }

        let mut contexts = Vec::with_capacity(self.hooks.len());
        for hook in &self.hooks {
            contexts.push(hook.before_write(&mut tx, order).await?);
        }

        let id = match order.id {
            Some(id) => {
                db::update_order(&mut tx, id, order).await?;
                id
            }
            None => db::insert_order(&mut tx, order).await?,
        };
        order.id = Some(id);

        for (hook, ctx) in self.hooks.iter().zip(contexts) {
            hook.after_write(&mut tx, order, created, ctx).await;
        }

        tx.commit().await?;
        info!(id, created, status = order.status.code(), "order saved");
        Ok(SaveOutcome { id, created })
    }

    /// Load an order, set its status and save it through the hooks.
    pub async fn set_status(&self, order_id: i64, status: OrderStatus) -> Result<Order> {
        let mut order = db::fetch_order(&self.pool, order_id)
            .await?
            .ok_or_else(|| anyhow!("order {} not found", order_id))?;
        order.status = status;
        self.save(&mut order).await?;
        Ok(order)
    }
}
