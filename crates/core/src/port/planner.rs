// Planner Port
// Plan generation from natural language lives outside the engine

use crate::domain::Plan;
use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait Planner: Send + Sync {
    /// Decompose `description` into an executable plan.
    ///
    /// `context` is free-form background the caller wants the planner to see.
    async fn generate_plan(&self, description: &str, context: Option<&str>) -> Result<Plan>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::sync::Mutex;

    /// Always errors, forcing the fallback plan
    pub struct UnavailablePlanner;

    #[async_trait]
    impl Planner for UnavailablePlanner {
        async fn generate_plan(&self, _description: &str, _context: Option<&str>) -> Result<Plan> {
            Err(AppError::Planning("planner unavailable".to_string()))
        }
    }

    /// Returns a fixed plan and remembers what it was asked
    pub struct FixedPlanner {
        plan: Plan,
        requests: Mutex<Vec<String>>,
    }

    impl FixedPlanner {
        pub fn new(plan: Plan) -> Self {
            Self {
                plan,
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn requests(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Planner for FixedPlanner {
        async fn generate_plan(&self, description: &str, _context: Option<&str>) -> Result<Plan> {
            self.requests.lock().unwrap().push(description.to_string());
            let mut plan = self.plan.clone();
            if plan.task.is_empty() {
                plan.task = description.to_string();
            }
            Ok(plan)
        }
    }
}
