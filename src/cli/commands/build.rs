//! Build command - run the lifecycle against an app directory

use crate::build::{resolve_app_dir, BuildFactory, BuildFlags, BuildOutcome};
use crate::cancel::Cancellation;
use crate::cli::args::BuildArgs;
use crate::config::{Config, ConfigManager};
use crate::credentials::DockerConfigCredentials;
use crate::error::{PackError, PackResult};
use crate::logging::{LogSink, TracingSink};
use crate::orchestration::create_runtime;
use crate::ui::{self, PipelineProgress, UiContext};
use std::sync::Arc;
use tracing::debug;

/// Execute the build command
pub async fn execute(args: BuildArgs, config: &Config, cancel: &Cancellation) -> PackResult<()> {
    let ctx = UiContext::detect().with_quiet(args.quiet);
    let app_dir = resolve_app_dir(args.path.as_deref())?;

    let runtime = create_runtime(config);
    runtime.ensure_ready().await?;
    debug!("Using {} runtime", runtime.runtime_name());

    let credentials = DockerConfigCredentials::load(&ConfigManager::docker_config_dir(config)).await?;
    if let Some(source) = credentials.source() {
        debug!("Registry credentials from {}", source.display());
    }

    let progress = Arc::new(PipelineProgress::new(&ctx));
    // Structured logs keep phase output in the log stream
    let sink: Arc<dyn LogSink> = if config.general.log_format == "json" {
        Arc::new(TracingSink)
    } else {
        progress.clone()
    };
    let factory = BuildFactory::new(runtime, config.clone(), Arc::new(credentials), sink);

    let flags = BuildFlags {
        app_dir: Some(app_dir),
        builder: args.builder,
        run_image: args.run_image,
        env_file: args.env_file,
        repo_name: Some(args.repo_name),
        publish: args.publish,
        no_pull: args.no_pull,
        clear_cache: args.clear_cache,
        buildpacks: args.buildpacks,
    };

    let build = factory
        .build_config_from_flags(flags)
        .await?
        .with_observer(progress.clone());

    ui::intro(&ctx, &format!("Building {}", build.repo_name));
    ui::key_value(&ctx, "Builder", &build.builder);
    ui::key_value(&ctx, "Run image", &build.run_image);
    ui::key_value(&ctx, "Cache", build.cache.image());

    let result = build.run(cancel).await;
    progress.finish();

    match result {
        Ok(outcome) => {
            print_outcome(&ctx, &outcome, build.publish);
            Ok(())
        }
        Err(e) => {
            if let Some(step) = failed_phase(&e) {
                ui::step_error(&ctx, &step);
            }
            ui::outro_error(&ctx, &format!("Build of {} failed", build.repo_name));
            Err(e)
        }
    }
}

fn print_outcome(ctx: &UiContext, outcome: &BuildOutcome, publish: bool) {
    ui::section(ctx, "Buildpacks");
    for bp in &outcome.group.buildpacks {
        ui::step_ok_detail(ctx, &bp.id, &bp.version);
    }
    match outcome.report {
        Some(ref report) => ui::step_info(
            ctx,
            &format!(
                "{} layers reused, {} rebuilt",
                report.reused(),
                report.rebuilt()
            ),
        ),
        None if !publish => ui::step_warn(ctx, "Exported image carries no layer metadata"),
        None => {}
    }
    ui::outro_success(ctx, &format!("Successfully built {}", outcome.repo_name));
}

/// Step line naming the phase a build died in
fn failed_phase(e: &PackError) -> Option<String> {
    match e.root() {
        PackError::PhaseExecution { phase, code } => {
            Some(format!("{} phase exited with code {}", phase, code))
        }
        PackError::PhaseCancelled { phase } => Some(format!("{} phase cancelled", phase)),
        _ => None,
    }
}
