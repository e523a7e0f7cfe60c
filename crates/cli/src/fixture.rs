//! Simulation fixtures: a loop step, the flow state it starts from, and a
//! script for each branch body.
//!
//! ```json
//! {
//!   "step": { "name": "deploy", "statement": { "form": "list", ... }, ... },
//!   "variables": { "hosts": ["a", "b", "c"] },
//!   "globals": { "region": "eu" },
//!   "roi": 0,
//!   "bodies": {
//!     "b": { "result": "FAILURE", "cost": 2, "set": { "status": "down" } },
//!     "c": { "raise": "connection refused" }
//!   }
//! }
//! ```
//!
//! Bodies are keyed by the text form of the branch's loop variable (the key
//! variable for map loops). Items without a script succeed at no cost.

use std::collections::BTreeMap;
use std::str::FromStr;

use lanes_core::{
    Context, ParallelLoopStatement, ParallelLoopStep, ReturnValues, RunEnvironment, Value,
    Variables, SUCCESS_RESULT,
};
use lanes_engine::{BranchBody, BranchCompletion, BranchId};
use rust_decimal::Decimal;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub(crate) struct Fixture {
    pub step: ParallelLoopStep,
    #[serde(default)]
    pub variables: Variables,
    #[serde(default)]
    pub globals: Variables,
    #[serde(default)]
    pub system_properties: Variables,
    #[serde(default)]
    pub roi: Value,
    #[serde(default)]
    pub bodies: BTreeMap<String, BodyScript>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct BodyScript {
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub raise: Option<String>,
    #[serde(default)]
    pub cost: Value,
    #[serde(default)]
    pub set: Variables,
}

impl Fixture {
    /// The flow environment the loop starts from.
    pub fn environment(&self) -> Result<RunEnvironment, String> {
        let mut env = RunEnvironment::with_system_properties(self.system_properties.clone());
        env.set_total_roi(decimal(&self.roi, "roi")?);
        env.push_context(Context::with_magic_variables(
            self.variables.clone(),
            self.globals.clone(),
        ));
        Ok(env)
    }

    pub fn body(&self) -> Result<ScriptedBody, String> {
        let key_variable = match &self.step.statement {
            ParallelLoopStatement::List { var_name, .. } => var_name.clone(),
            ParallelLoopStatement::Map { key_name, .. } => key_name.clone(),
        };
        let scripts = self
            .bodies
            .iter()
            .map(|(key, script)| {
                let cost = decimal(&script.cost, &format!("bodies.{}.cost", key))?;
                Ok((key.clone(), Script { script: script.clone(), cost }))
            })
            .collect::<Result<_, String>>()?;
        Ok(ScriptedBody {
            key_variable,
            scripts,
        })
    }
}

fn decimal(value: &Value, field: &str) -> Result<Decimal, String> {
    match value {
        Value::Null => Ok(Decimal::ZERO),
        Value::Int(i) => Ok(Decimal::from(*i)),
        Value::Decimal(d) => Ok(*d),
        Value::Text(s) => {
            Decimal::from_str(s).map_err(|e| format!("{} is not a number: {}", field, e))
        }
        other => Err(format!("{} must be a number, got {}", field, other.type_name())),
    }
}

#[derive(Debug, Clone)]
struct Script {
    script: BodyScript,
    cost: Decimal,
}

/// Branch body that replays the fixture's per-item scripts.
#[derive(Debug, Clone)]
pub(crate) struct ScriptedBody {
    key_variable: String,
    scripts: BTreeMap<String, Script>,
}

impl BranchBody for ScriptedBody {
    fn run(&self, _branch_id: BranchId, mut env: RunEnvironment) -> BranchCompletion {
        let key = env
            .peek_context()
            .and_then(|ctx| ctx.get_variable(&self.key_variable))
            .map(Value::to_string)
            .unwrap_or_default();
        let Some(Script { script, cost }) = self.scripts.get(&key) else {
            env.put_return_values(ReturnValues::new(Variables::new(), SUCCESS_RESULT));
            return BranchCompletion::finished(env);
        };

        if let Some(ctx) = env.peek_context_mut() {
            ctx.put_variables(script.set.clone());
        }
        env.add_roi(*cost);
        if let Some(exception) = &script.raise {
            return BranchCompletion::raised(env, exception.as_str());
        }
        let result = script.result.as_deref().unwrap_or(SUCCESS_RESULT);
        env.put_return_values(ReturnValues::new(Variables::new(), result));
        BranchCompletion::finished(env)
    }
}
