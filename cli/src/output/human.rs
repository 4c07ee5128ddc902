//! Human-readable terminal renderer.

use owo_colors::OwoColorize as _;
use spotdeploy_common::{JobMetadata, RoutingEntry, StageResult, VmAllocation};

use crate::application::services::context::BoundContext;
use crate::application::services::teardown::TeardownReport;
use crate::application::services::vm::lifecycle::{RecoveryOutcome, VmInfo};
use crate::domain::identity::DerivedNames;
use crate::output::OutputContext;

/// Renders service results as human-readable terminal output using `OutputContext`.
pub struct HumanRenderer<'a> {
    ctx: &'a OutputContext,
}

impl<'a> HumanRenderer<'a> {
    /// Create a new `HumanRenderer` wrapping the given output context.
    #[must_use]
    pub fn new(ctx: &'a OutputContext) -> Self {
        Self { ctx }
    }

    pub fn render_names(&self, names: &DerivedNames) {
        self.ctx.kv("VM:", &names.vm_name);
        self.ctx.kv("Context:", &names.context_name);
        self.ctx.kv("Project:", &names.project_name);
        self.ctx.kv("Key:", &names.key);
    }

    pub fn render_allocation(&self, vm: &VmAllocation) {
        self.ctx
            .success(&format!("{} is {} at {}", vm.vm_name, vm.status, vm.private_ip));
    }

    pub fn render_vm_info(&self, info: &VmInfo) {
        if !info.allocated {
            self.ctx.info(&format!("No VM allocated ({}).", info.vm_name));
            return;
        }
        self.ctx.header(&info.vm_name);
        let rows = [
            ("Status:", info.status.map(|s| s.to_string())),
            ("Private IP:", info.private_ip.clone()),
            ("Size:", info.size.clone()),
            ("Location:", info.location.clone()),
        ];
        for (key, value) in rows {
            self.ctx.kv(key, value.as_deref().unwrap_or("-"));
        }
    }

    pub fn render_ready(&self, vm_name: &str, ready: bool) {
        if ready {
            self.ctx.success(&format!("{vm_name} is ready"));
        } else {
            self.ctx.warn(&format!("{vm_name} is not ready yet"));
        }
    }

    pub fn render_recovery(&self, vm_name: &str, outcome: &RecoveryOutcome) {
        match outcome {
            RecoveryOutcome::Healthy => self.ctx.success(&format!("{vm_name} is running")),
            RecoveryOutcome::Recovered { private_ip } => self
                .ctx
                .success(&format!("{vm_name} restarted at {private_ip}")),
            RecoveryOutcome::RestartFailed { reason } => {
                self.ctx.warn(&format!("{vm_name} could not be restarted: {reason}"));
                self.ctx.info("Recreate it: spotdeploy vm allocate --force-recreate");
            }
            RecoveryOutcome::NotAllocated => {
                self.ctx.info(&format!("No VM allocated ({vm_name})."));
            }
            RecoveryOutcome::Unknown { status } => {
                self.ctx.warn(&format!("{vm_name} is {status}, nothing to recover"));
            }
        }
    }

    pub fn render_context(&self, context: &BoundContext) {
        self.ctx.success(&format!(
            "context {} bound to {}",
            context.context_name, context.ip
        ));
    }

    /// One line per pipeline stage, printed as the stage completes.
    pub fn render_stage(&self, result: &StageResult) {
        let stage = result.stage();
        match result.error() {
            None => self.ctx.success(&format!("{stage}: {}", result.message())),
            Some(error) => self
                .ctx
                .error(&format!("{stage}: {} ({error})", result.message())),
        }
    }

    pub fn render_job(&self, metadata: &JobMetadata) {
        match metadata {
            JobMetadata::Allocated { vm } => self.render_allocation(vm),
            JobMetadata::Deployed {
                project_name,
                private_ip,
                urls,
            } => {
                self.ctx
                    .success(&format!("{project_name} deployed on {private_ip}"));
                self.render_urls(urls);
            }
            JobMetadata::Failed { stage, message } => {
                self.ctx.error(&format!("{stage} failed: {message}"));
            }
            JobMetadata::ServerError { stage, message } => {
                self.ctx.error(&format!("{stage} failed: {message}"));
                self.ctx.info("This looks like a platform problem. Retry later.");
            }
            JobMetadata::InternalError { message } => self.ctx.error(message),
        }
    }

    pub fn render_routes(&self, entries: &[RoutingEntry], removed: &[String]) {
        if entries.is_empty() {
            self.ctx.warn("No routes published.");
        }
        for entry in entries {
            self.ctx.kv(
                &format!("{}:", entry.service_name),
                &format!(
                    "{} → {}",
                    entry.external_url().style(self.ctx.styles.link),
                    entry.backend_url()
                ),
            );
        }
        for hostname in removed {
            self.ctx.warn(&format!("removed {hostname}"));
        }
    }

    pub fn render_teardown(&self, report: &TeardownReport) {
        let steps = [
            (report.services_stopped, "services stopped"),
            (report.routes_removed, "routes removed"),
            (report.context_removed, "context removed"),
            (report.vm_deleted, "VM deleted"),
        ];
        for (done, label) in steps {
            if done {
                self.ctx.success(label);
            }
        }
        for warning in &report.warnings {
            self.ctx.warn(warning);
        }
    }

    fn render_urls(&self, urls: &[String]) {
        if urls.is_empty() {
            self.ctx.warn("No public URLs.");
            return;
        }
        for url in urls {
            if !self.ctx.quiet {
                println!("    {}", url.style(self.ctx.styles.link));
            }
        }
    }
}
