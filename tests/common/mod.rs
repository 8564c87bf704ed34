#![allow(dead_code, unused_imports)]

pub use flowtk_test_utils::builders::*;
pub use flowtk_test_utils::fake_queue::{FakeOutcome, FakeQueue};
pub use flowtk_test_utils::{init_tracing, with_timeout};
