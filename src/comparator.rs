use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::comparison::{compare, type_name};
use crate::errors::AssertError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    #[serde(rename = ">")]
    Greater,
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = "<")]
    Less,
    #[serde(rename = "<=")]
    LessOrEqual,
}

impl Op {
    pub fn holds(self, ord: Ordering) -> bool {
        match self {
            Op::Greater => ord == Ordering::Greater,
            Op::GreaterOrEqual => ord != Ordering::Less,
            Op::Less => ord == Ordering::Less,
            Op::LessOrEqual => ord != Ordering::Greater,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Op::Greater => ">",
            Op::GreaterOrEqual => ">=",
            Op::Less => "<",
            Op::LessOrEqual => "<=",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `actual <op> operand`, e.g. `greater(1)` accepts `2` and rejects `1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparator {
    op: Op,
    operand: Value,
}

impl Comparator {
    pub fn new(op: Op, operand: impl Into<Value>) -> Self {
        Self {
            op,
            operand: operand.into(),
        }
    }

    pub fn op(&self) -> Op {
        self.op
    }

    pub fn operand(&self) -> &Value {
        &self.operand
    }

    pub fn assert(&self, actual: &Value) -> Result<(), AssertError> {
        match compare(actual, &self.operand) {
            Some(ord) if self.op.holds(ord) => Ok(()),
            Some(_) => Err(AssertError::Comparison {
                op: self.op,
                operand: self.operand.clone(),
                actual: actual.clone(),
            }),
            None => Err(AssertError::Incomparable {
                actual_type: type_name(actual),
                operand_type: type_name(&self.operand),
            }),
        }
    }
}

pub fn greater(operand: impl Into<Value>) -> Comparator {
    Comparator::new(Op::Greater, operand)
}

pub fn greater_or_equal(operand: impl Into<Value>) -> Comparator {
    Comparator::new(Op::GreaterOrEqual, operand)
}

pub fn less(operand: impl Into<Value>) -> Comparator {
    Comparator::new(Op::Less, operand)
}

pub fn less_or_equal(operand: impl Into<Value>) -> Comparator {
    Comparator::new(Op::LessOrEqual, operand)
}
