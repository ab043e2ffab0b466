//! OpenClaw Testing - 测试替身与跨 crate 场景

use tracing_subscriber::EnvFilter;

/// 测试日志, 默认只输出 warn 以上，可用 `RUST_LOG` 覆盖
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub mod transport {
    use async_trait::async_trait;
    use openclaw_agent::{DelegationTransport, Handoff};
    use openclaw_core::{CoordinationError, Result};
    use std::sync::{Arc, Mutex};

    /// 记录所有投递内容的通道
    #[derive(Clone, Default)]
    pub struct RecordingTransport {
        delivered: Arc<Mutex<Vec<Handoff>>>,
        should_fail: Arc<Mutex<bool>>,
    }

    impl RecordingTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing() -> Self {
            let transport = Self::default();
            transport.set_should_fail(true);
            transport
        }

        pub fn set_should_fail(&self, should_fail: bool) {
            *self.should_fail.lock().unwrap() = should_fail;
        }

        pub fn delivered(&self) -> Vec<Handoff> {
            self.delivered.lock().unwrap().clone()
        }

        pub fn delivered_to(&self, agent: &str) -> Vec<Handoff> {
            self.delivered()
                .into_iter()
                .filter(|h| h.target == agent)
                .collect()
        }
    }

    #[async_trait]
    impl DelegationTransport for RecordingTransport {
        async fn deliver(&self, handoff: &Handoff) -> Result<()> {
            if *self.should_fail.lock().unwrap() {
                return Err(CoordinationError::Transport("mock gateway offline".to_string()));
            }
            self.delivered.lock().unwrap().push(handoff.clone());
            Ok(())
        }
    }
}

pub mod store {
    use async_trait::async_trait;
    use openclaw_core::{CoordinationError, Result};
    use openclaw_memory::{GraphStore, QuerySpec, Record};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 可连接但每个操作都失败的存储
    #[derive(Default)]
    pub struct FailingStore {
        calls: Arc<AtomicUsize>,
    }

    impl FailingStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn fail<T>(&self) -> Result<T> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(CoordinationError::Store("injected failure".to_string()))
        }
    }

    #[async_trait]
    impl GraphStore for FailingStore {
        fn name(&self) -> &str {
            "failing"
        }

        async fn is_available(&self) -> bool {
            true
        }

        async fn run(&self, _query: &QuerySpec) -> Result<Vec<Record>> {
            self.fail()
        }

        async fn count(&self, _query: &QuerySpec) -> Result<usize> {
            self.fail()
        }

        async fn create(&self, _label: &str, _record: Record) -> Result<()> {
            self.fail()
        }

        async fn update_where(
            &self,
            _query: &QuerySpec,
            _changes: Record,
        ) -> Result<Option<Record>> {
            self.fail()
        }
    }
}

pub mod context {
    use async_trait::async_trait;
    use openclaw_agent::ContextSource;
    use openclaw_core::Result;

    /// 固定返回一组上下文片段
    #[derive(Debug, Clone, Default)]
    pub struct StaticContext {
        snippets: Vec<String>,
    }

    impl StaticContext {
        pub fn new(snippets: Vec<String>) -> Self {
            Self { snippets }
        }
    }

    #[async_trait]
    impl ContextSource for StaticContext {
        async fn related_context(&self, _description: &str) -> Result<Vec<String>> {
            Ok(self.snippets.clone())
        }
    }
}

pub use context::StaticContext;
pub use store::FailingStore;
pub use transport::RecordingTransport;
