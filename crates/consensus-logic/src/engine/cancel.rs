use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Shared flag used to tell a running seal search to give up.  Clones share
/// the same flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Returns if two tokens share a flag.
    pub fn same_as(&self, other: &CancelToken) -> bool {
        Arc::ptr_eq(&self.flag, &other.flag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_flag() {
        let a = CancelToken::new();
        let b = a.clone();
        assert!(a.same_as(&b));
        assert!(!a.same_as(&CancelToken::new()));

        b.cancel();
        assert!(a.is_cancelled());
    }
}
