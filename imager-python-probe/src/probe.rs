//! Smoke test for the scripted modules the imager delegates to.
//!
//! Mirrors what the pipeline does at runtime: import the mask generator
//! module, instantiate its class, fetch the generation method, and resolve the
//! image decoding entry points.

use crate::config::{AttributeCheck, MaskGeneratorSettings, ProbeSettings};
use anyhow::{Context, Result};
use imager_python::{FailureKind, GuestHandle, GuestObject, InterpreterHost};
use tracing::{debug, error, info};

/// Outcome of a single check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Everything resolved.
    Passed,
    /// The check stopped at the described failure.
    Failed(String),
}

impl CheckOutcome {
    fn from_result(result: Result<()>) -> Self {
        match result {
            Ok(()) => CheckOutcome::Passed,
            Err(e) => CheckOutcome::Failed(format!("{e:#}")),
        }
    }
}

/// Results of a probe run.
#[derive(Debug, Clone)]
pub struct ProbeReport {
    /// `sys.path` as the guest sees it.
    pub search_path: Vec<String>,
    /// Mask generator check.
    pub mask_generator: CheckOutcome,
    /// Attribute chain checks, by dotted name.
    pub attribute_checks: Vec<(String, CheckOutcome)>,
}

impl ProbeReport {
    /// Whether every check passed.
    pub fn all_passed(&self) -> bool {
        self.mask_generator == CheckOutcome::Passed
            && self
                .attribute_checks
                .iter()
                .all(|(_, outcome)| *outcome == CheckOutcome::Passed)
    }

    /// Number of failed checks.
    pub fn failures(&self) -> usize {
        let generator = usize::from(self.mask_generator != CheckOutcome::Passed);
        generator
            + self
                .attribute_checks
                .iter()
                .filter(|(_, outcome)| *outcome != CheckOutcome::Passed)
                .count()
    }
}

/// Run every configured check against the host.
pub fn run(host: &InterpreterHost, settings: &ProbeSettings) -> ProbeReport {
    let search_path = host.effective_search_path();

    let mask_generator = CheckOutcome::from_result(check_mask_generator(
        host,
        &settings.mask_generator,
        settings.list_attributes,
    ));
    log_outcome(&settings.mask_generator.module, &mask_generator);

    let attribute_checks = settings
        .attribute_checks
        .iter()
        .map(|check| {
            let name = check.display_name();
            let outcome = CheckOutcome::from_result(check_attribute_chain(host, check));
            log_outcome(&name, &outcome);
            (name, outcome)
        })
        .collect();

    ProbeReport {
        search_path,
        mask_generator,
        attribute_checks,
    }
}

fn log_outcome(name: &str, outcome: &CheckOutcome) {
    match outcome {
        CheckOutcome::Passed => info!("{}: ok", name),
        CheckOutcome::Failed(reason) => error!("{}: {}", name, reason),
    }
}

/// Borrow the object behind a handle that passed `check`.
fn object<'a>(handle: &'a GuestHandle<'_>) -> Result<&'a GuestObject> {
    handle.object().context("Guest returned an empty handle")
}

fn check_mask_generator(
    host: &InterpreterHost,
    settings: &MaskGeneratorSettings,
    list_attributes: bool,
) -> Result<()> {
    let module = host
        .check(host.import(&settings.module), FailureKind::Import)
        .with_context(|| format!("Failed to import {} module", settings.module))?;
    let module = object(&module)?;

    if list_attributes {
        debug!("Listing attributes of {} module:", settings.module);
        for name in host.attribute_names(module).unwrap_or_default() {
            debug!("  Attribute: {}", name);
        }
    }

    let class = match host.check(host.get_attr(module, &settings.class), FailureKind::Attribute) {
        Ok(class) => class,
        Err(e) => {
            let file = host.get_attr(module, "__file__");
            let path = file.object().and_then(|f| host.cast::<String>(f));
            host.clear_error();
            debug!(
                "{} module file path: {}",
                settings.module,
                path.as_deref().unwrap_or("unknown")
            );
            return Err(e).with_context(|| {
                format!(
                    "Failed to get {} attribute from {} module",
                    settings.class, settings.module
                )
            });
        }
    };

    let instance = host
        .check(host.call(object(&class)?), FailureKind::Call)
        .with_context(|| format!("Failed to create {} instance", settings.class))?;

    let method = host
        .check(
            host.get_attr(object(&instance)?, &settings.method),
            FailureKind::Attribute,
        )
        .with_context(|| {
            format!(
                "Failed to get {} attribute from {} instance",
                settings.method, settings.class
            )
        })?;

    if !host.is_callable(object(&method)?) {
        anyhow::bail!("{}.{} is not callable", settings.class, settings.method);
    }

    Ok(())
}

fn check_attribute_chain(host: &InterpreterHost, check: &AttributeCheck) -> Result<()> {
    let mut current = host
        .check(host.import(&check.module), FailureKind::Import)
        .with_context(|| format!("Failed to import {} module", check.module))?;

    for name in &check.path {
        let next = host
            .check(host.get_attr(object(&current)?, name), FailureKind::Attribute)
            .with_context(|| format!("Failed to resolve {}", name))?;
        current = next;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(mask_generator: CheckOutcome, checks: Vec<CheckOutcome>) -> ProbeReport {
        ProbeReport {
            search_path: vec!["/opt/app/bin".to_string()],
            mask_generator,
            attribute_checks: checks
                .into_iter()
                .enumerate()
                .map(|(i, outcome)| (format!("check{i}"), outcome))
                .collect(),
        }
    }

    #[test]
    fn test_all_passed() {
        let report = report(
            CheckOutcome::Passed,
            vec![CheckOutcome::Passed, CheckOutcome::Passed],
        );
        assert!(report.all_passed());
        assert_eq!(report.failures(), 0);
    }

    #[test]
    fn test_failures_counted() {
        let report = report(
            CheckOutcome::Failed("import failed".into()),
            vec![CheckOutcome::Passed, CheckOutcome::Failed("missing".into())],
        );
        assert!(!report.all_passed());
        assert_eq!(report.failures(), 2);
    }

    #[test]
    fn test_outcome_keeps_error_chain() {
        let err: Result<()> = Err(anyhow::anyhow!("ModuleNotFoundError"))
            .context("Failed to import MaskGenerator module");
        let outcome = CheckOutcome::from_result(err);
        assert_eq!(
            outcome,
            CheckOutcome::Failed(
                "Failed to import MaskGenerator module: ModuleNotFoundError".to_string()
            )
        );
    }
}
