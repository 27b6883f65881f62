//! `serde`-derived mirrors of `conduit_core::dispatcher`'s trace types.
//!
//! `conduit-core` deliberately carries no serialization dependency (spec.md
//! §6: "serialization format is external to the core and pluggable"), so
//! its `SessionTrace`/`StageTrace`/`Statistic` don't derive `Serialize`.
//! These mirror structs are the bridge: built by `From` conversions, they
//! carry exactly the same fields, ready for `ron` to write out.

use serde::{Deserialize, Serialize};

use conduit_core::sampler::Statistic as CoreStatistic;
use conduit_core::dispatcher::{SessionTrace as CoreSessionTrace, StageTrace as CoreStageTrace};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Statistic {
    pub count: usize,
    pub mean_secs: f64,
    pub min_secs: f64,
    pub max_secs: f64,
    pub stddev_secs: f64,
    pub median_secs: f64,
}

impl From<CoreStatistic> for Statistic {
    fn from(s: CoreStatistic) -> Self {
        Statistic {
            count: s.count,
            mean_secs: s.mean_secs,
            min_secs: s.min_secs,
            max_secs: s.max_secs,
            stddev_secs: s.stddev_secs,
            median_secs: s.median_secs,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTrace {
    pub name: String,
    pub execute: Option<Statistic>,
    pub task: Option<Statistic>,
}

impl From<&CoreStageTrace> for StageTrace {
    fn from(s: &CoreStageTrace) -> Self {
        StageTrace {
            name: s.name.clone(),
            execute: s.execute.map(Statistic::from),
            task: s.task.map(Statistic::from),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionTrace {
    pub stages: Vec<StageTrace>,
}

impl From<&CoreSessionTrace> for SessionTrace {
    fn from(s: &CoreSessionTrace) -> Self {
        SessionTrace {
            stages: s.stages.iter().map(StageTrace::from).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_ron() {
        let trace = SessionTrace {
            stages: vec![StageTrace {
                name: "source-feed".to_string(),
                execute: Some(Statistic {
                    count: 10,
                    mean_secs: 0.001,
                    min_secs: 0.0005,
                    max_secs: 0.002,
                    stddev_secs: 0.0002,
                    median_secs: 0.001,
                }),
                task: None,
            }],
        };
        let text = ron::ser::to_string_pretty(&trace, ron::ser::PrettyConfig::default()).unwrap();
        let parsed: SessionTrace = ron::from_str(&text).unwrap();
        assert_eq!(parsed.stages.len(), 1);
        assert_eq!(parsed.stages[0].name, "source-feed");
    }
}
