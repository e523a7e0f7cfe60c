use std::num::NonZeroUsize;
use std::process;

use lanes_runtime::plan_rounds;

use crate::{report_error, OutputFormat};

pub(crate) fn cmd_rounds(items: usize, throttle: Option<usize>, output: OutputFormat, quiet: bool) {
    let limit = match throttle {
        None => None,
        Some(t) => match NonZeroUsize::new(t) {
            Some(t) => Some(t),
            None => {
                report_error("error: --throttle must be at least 1", output, quiet);
                process::exit(1);
            }
        },
    };

    let plan = plan_rounds(items, limit);
    match output {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "items": items,
                "throttle": throttle,
                "rounds": plan,
            });
            println!("{}", json);
        }
        OutputFormat::Text => {
            for (i, size) in plan.iter().enumerate() {
                println!("round {}: {} branches", i + 1, size);
            }
            if !quiet {
                let limit = throttle.map_or_else(|| "unbounded".to_string(), |t| t.to_string());
                println!(
                    "{} items in {} rounds (throttle {})",
                    items,
                    plan.len(),
                    limit
                );
            }
        }
    }
}
