// ID Provider Port (for deterministic testing)

/// ID provider interface (allows deterministic run ids in tests)
pub trait IdProvider: Send + Sync {
    /// Generate a new unique pipeline run ID
    fn generate_id(&self) -> String;
}

/// UUID v4 provider (production)
pub struct UuidProvider;

impl IdProvider for UuidProvider {
    fn generate_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Sequential provider: run-1, run-2, ...
#[derive(Default)]
pub struct SequentialIdProvider {
    next: std::sync::atomic::AtomicU64,
}

impl IdProvider for SequentialIdProvider {
    fn generate_id(&self) -> String {
        let n = self
            .next
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
            + 1;
        format!("run-{}", n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_ids_are_unique() {
        let provider = UuidProvider;
        assert_ne!(provider.generate_id(), provider.generate_id());
    }

    #[test]
    fn test_sequential_ids() {
        let provider = SequentialIdProvider::default();
        assert_eq!(provider.generate_id(), "run-1");
        assert_eq!(provider.generate_id(), "run-2");
    }
}
