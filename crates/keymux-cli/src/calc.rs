//! Calculator handler used by the demo.

use std::time::Duration;

use async_trait::async_trait;
use keymux_core::Handler;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Calc {
    pub op: Op,
    pub x: f64,
    pub y: f64,
}

impl Calc {
    pub fn new(op: Op, x: f64, y: f64) -> Self {
        Self { op, x, y }
    }
}

/// Sleeps `delay` per request, then applies the operation.
///
/// Division by zero is treated as a bug in the caller and panics.
pub struct CalcHandler {
    delay: Duration,
}

impl CalcHandler {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl Handler for CalcHandler {
    type Value = Calc;
    type Output = f64;
    type Error = String;

    async fn handle(&self, key: &[u8], calc: Calc) -> Result<f64, String> {
        tokio::time::sleep(self.delay).await;
        if !calc.x.is_finite() || !calc.y.is_finite() {
            return Err(format!(
                "non-finite operand for key {}",
                String::from_utf8_lossy(key)
            ));
        }
        let out = match calc.op {
            Op::Add => calc.x + calc.y,
            Op::Sub => calc.x - calc.y,
            Op::Mul => calc.x * calc.y,
            Op::Div => {
                assert!(calc.y != 0.0, "division by zero");
                calc.x / calc.y
            }
        };
        Ok(out)
    }
}
