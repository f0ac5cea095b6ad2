//! Scenario execution.
//!
//! For each scenario the runner probes capabilities, decides whether the
//! scenario applies, runs its body against a fresh [`ScenarioContext`] and
//! then tears down whatever the body left registered.  Teardown happens on
//! every path that built a context, so a failing assertion never leaks
//! resources the tracker knows about.

use std::sync::Arc;

use tracing::{Instrument, info, info_span, warn};

use crate::capability::CapabilityRegistry;
use crate::config::SanityConfig;
use crate::context::{PluginClients, ScenarioContext};
use crate::error::{ScenarioError, TeardownError};
use crate::naming::IdentifierGenerator;
use crate::scenarios::Scenario;

#[derive(Debug)]
pub enum Outcome {
    Passed,
    Failed(ScenarioError),
    /// The plugin lacks a capability; carries the reason.
    Skipped(String),
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Passed => "PASS",
            Self::Failed(_) => "FAIL",
            Self::Skipped(_) => "SKIP",
        }
    }
}

#[derive(Debug)]
pub struct ScenarioReport {
    pub name: String,
    pub outcome: Outcome,
    /// Cleanup failures; diagnostics only, they do not change `outcome`.
    pub teardown: Vec<TeardownError>,
}

#[derive(Debug, Default)]
pub struct SuiteReport {
    pub scenarios: Vec<ScenarioReport>,
}

impl SuiteReport {
    fn count(&self, f: impl Fn(&Outcome) -> bool) -> usize {
        self.scenarios.iter().filter(|r| f(&r.outcome)).count()
    }

    pub fn passed(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Passed))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Failed(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Skipped(_)))
    }

    /// Resources teardown could not release, across all scenarios.
    pub fn leaked(&self) -> usize {
        self.scenarios.iter().map(|r| r.teardown.len()).sum()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    pub fn get(&self, name: &str) -> Option<&ScenarioReport> {
        self.scenarios.iter().find(|r| r.name == name)
    }
}

pub struct ScenarioRunner {
    plugin: PluginClients,
    config: Arc<SanityConfig>,
    names: Arc<IdentifierGenerator>,
}

impl ScenarioRunner {
    pub fn new(plugin: PluginClients, config: Arc<SanityConfig>) -> Self {
        Self {
            plugin,
            config,
            names: Arc::new(IdentifierGenerator::new()),
        }
    }

    /// Token embedded in every resource name this runner generates.
    pub fn run_token(&self) -> &str {
        self.names.run_token()
    }

    pub async fn run(&self, scenario: &dyn Scenario) -> ScenarioReport {
        let name = scenario.name().to_owned();
        let span = info_span!("scenario", name = %name);
        let (outcome, teardown) = self.execute(scenario).instrument(span).await;
        ScenarioReport {
            name,
            outcome,
            teardown,
        }
    }

    async fn execute(&self, scenario: &dyn Scenario) -> (Outcome, Vec<TeardownError>) {
        let flags = match CapabilityRegistry::new(&self.plugin).probe().await {
            Ok(flags) => flags,
            Err(e) => {
                warn!(error = %e, "capability probe failed");
                return (Outcome::Failed(e), Vec::new());
            }
        };

        if let Some(cap) = scenario.requirement()
            && !flags.supports(cap)
        {
            info!(capability = %cap, "scenario skipped");
            return (
                Outcome::Skipped(format!("plugin does not advertise {cap}")),
                Vec::new(),
            );
        }

        let mut ctx = ScenarioContext::new(
            self.plugin.clone(),
            Arc::clone(&self.config),
            flags,
            Arc::clone(&self.names),
        );
        let result = scenario.run(&mut ctx).await;
        let teardown = ctx.tracker.teardown_all().await;

        let outcome = match result {
            Ok(()) => {
                info!("scenario passed");
                Outcome::Passed
            }
            Err(e) => {
                warn!(error = %e, kind = %e.kind(), "scenario failed");
                Outcome::Failed(e)
            }
        };
        (outcome, teardown)
    }

    /// Run `scenarios` one after another.  A failure never stops the run.
    pub async fn run_all(&self, scenarios: &[Box<dyn Scenario>]) -> SuiteReport {
        let mut report = SuiteReport::default();
        for scenario in scenarios {
            report.scenarios.push(self.run(scenario.as_ref()).await);
        }
        info!(
            passed = report.passed(),
            failed = report.failed(),
            skipped = report.skipped(),
            "suite finished"
        );
        report
    }
}
