//! Smol runtime spawner implementation

use crate::{BoxedTask, Spawner};

/// Spawner for the smol global executor
#[derive(Debug, Clone, Copy, Default)]
pub struct SmolSpawner;

impl Spawner for SmolSpawner {
    fn spawn(&self, future: BoxedTask) {
        smol::spawn(future).detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[smol_potat::test]
    async fn test_smol_spawner() {
        let spawner = SmolSpawner;
        let (tx, rx) = async_channel::bounded(1);

        spawner.spawn(Box::pin(async move {
            tx.send(42).await.unwrap();
        }));

        assert_eq!(rx.recv().await.unwrap(), 42);
    }

    #[smol_potat::test]
    async fn test_smol_spawner_through_arc() {
        let spawner: std::sync::Arc<dyn Spawner> = std::sync::Arc::new(SmolSpawner);
        let (tx, rx) = async_channel::bounded(1);

        spawner.spawn(Box::pin(async move {
            tx.send(123).await.unwrap();
        }));

        assert_eq!(rx.recv().await.unwrap(), 123);
    }
}
