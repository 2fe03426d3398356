//! Config command - show or edit configuration

use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{CacheBackend, Config, ConfigManager};
use crate::error::{PackError, PackResult};
use crate::image::ImageRef;
use crate::orchestration::Engine;
use crate::ui::{self, UiContext};
use std::path::PathBuf;

/// Execute the config command
pub async fn execute(args: ConfigArgs, manager: &ConfigManager, config: &Config) -> PackResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => show_config(config)?,
        Some(ConfigAction::Path) => show_path(manager),
        Some(ConfigAction::Init { force }) => init_config(manager, force).await?,
        Some(ConfigAction::Set { key, value }) => set_value(manager, config, &key, &value).await?,
        Some(ConfigAction::SetDefaultBuilder { builder }) => {
            set_value(manager, config, "build.default_builder", &builder).await?
        }
        Some(ConfigAction::SetRunImageMirrors { run_image, mirrors }) => {
            set_run_image_mirrors(manager, config, &run_image, mirrors).await?
        }
    }

    Ok(())
}

fn show_config(config: &Config) -> PackResult<()> {
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

fn show_path(manager: &ConfigManager) {
    println!("{}", manager.path().display());
}

async fn init_config(manager: &ConfigManager, force: bool) -> PackResult<()> {
    let ctx = UiContext::detect();
    let path = manager.path();

    if path.exists() && !force {
        ui::step_warn_hint(
            &ctx,
            &format!("Config already exists at {}", path.display()),
            "Use --force to overwrite",
        );
        return Ok(());
    }

    manager.save(&Config::default()).await?;

    ui::step_ok_detail(
        &ctx,
        "Configuration initialized",
        &path.display().to_string(),
    );

    Ok(())
}

async fn set_value(
    manager: &ConfigManager,
    config: &Config,
    key: &str,
    value: &str,
) -> PackResult<()> {
    let ctx = UiContext::detect();
    let mut config = config.clone();

    apply_value(&mut config, key, value)?;

    manager.save(&config).await?;
    ui::step_ok(&ctx, &format!("Set {} = {}", key, value));

    Ok(())
}

/// Apply a dot-separated key to the configuration
fn apply_value(config: &mut Config, key: &str, value: &str) -> PackResult<()> {
    let parts: Vec<&str> = key.split('.').collect();

    match parts.as_slice() {
        ["general", "verbose"] => config.general.verbose = parse_bool(value)?,
        ["general", "log_format"] => config.general.log_format = parse_log_format(value)?,

        ["engine", "kind"] => config.engine.kind = parse_engine(value)?,
        ["engine", "socket"] => config.engine.socket = non_empty(value),
        ["engine", "docker_config_dir"] => {
            config.engine.docker_config_dir = non_empty(value).map(PathBuf::from)
        }

        ["build", "default_builder"] => {
            ImageRef::parse(value)?;
            config.build.default_builder = value.to_string()
        }
        ["build", "lifecycle_dir"] => config.build.lifecycle_dir = value.to_string(),

        ["cache", "backend"] => config.cache.backend = parse_cache_backend(value)?,

        _ => {
            return Err(PackError::User(format!(
                "Unknown config key: {} (valid keys: {})",
                key,
                VALID_KEYS.join(", ")
            )))
        }
    }

    Ok(())
}

async fn set_run_image_mirrors(
    manager: &ConfigManager,
    config: &Config,
    run_image: &str,
    mirrors: Vec<String>,
) -> PackResult<()> {
    let ctx = UiContext::detect();

    ImageRef::parse(run_image)?;
    for mirror in &mirrors {
        ImageRef::parse(mirror)?;
    }

    let mut config = config.clone();
    config.set_run_image_mirrors(run_image, mirrors.clone());
    manager.save(&config).await?;

    if mirrors.is_empty() {
        ui::step_ok(&ctx, &format!("Cleared mirrors for {}", run_image));
    } else {
        ui::step_ok(&ctx, &format!("Run image {} mirrored by:", run_image));
        for mirror in &mirrors {
            ui::remark(&ctx, mirror);
        }
    }

    Ok(())
}

const VALID_KEYS: &[&str] = &[
    "general.verbose",
    "general.log_format",
    "engine.kind",
    "engine.socket",
    "engine.docker_config_dir",
    "build.default_builder",
    "build.lifecycle_dir",
    "cache.backend",
];

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn parse_bool(value: &str) -> PackResult<bool> {
    match value.to_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Ok(true),
        "false" | "no" | "0" | "off" => Ok(false),
        _ => Err(PackError::User(format!("Invalid boolean: {}", value))),
    }
}

fn parse_log_format(value: &str) -> PackResult<String> {
    match value {
        "text" | "json" => Ok(value.to_string()),
        _ => Err(PackError::User(format!(
            "Invalid log format: {} (expected text or json)",
            value
        ))),
    }
}

fn parse_engine(value: &str) -> PackResult<Engine> {
    match value.to_lowercase().as_str() {
        "docker" => Ok(Engine::Docker),
        "podman" => Ok(Engine::Podman),
        _ => Err(PackError::User(format!(
            "Invalid engine: {} (expected docker or podman)",
            value
        ))),
    }
}

fn parse_cache_backend(value: &str) -> PackResult<CacheBackend> {
    match value.to_lowercase().as_str() {
        "image" => Ok(CacheBackend::Image),
        "volume" => Ok(CacheBackend::Volume),
        _ => Err(PackError::User(format!(
            "Invalid cache backend: {} (expected image or volume)",
            value
        ))),
    }
}
