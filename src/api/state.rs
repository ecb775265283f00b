//! API shared state

use std::sync::Arc;

use crate::session::TestSession;

/// Shared state passed to all API handlers
#[derive(Clone)]
pub struct ApiState {
    pub session: Arc<TestSession>,
}

impl ApiState {
    pub fn new(session: Arc<TestSession>) -> Self {
        Self { session }
    }
}
