//! Integration tests for pack

mod fake;

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use tempfile::TempDir;

    fn pack() -> Command {
        cargo_bin_cmd!("pack")
    }

    #[test]
    fn help_displays() {
        pack()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("buildpacks"));
    }

    #[test]
    fn version_displays() {
        pack()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("pack"));
    }

    #[test]
    fn build_help_lists_flags() {
        pack()
            .args(["build", "--help"])
            .assert()
            .success()
            .stdout(predicate::str::contains("--run-image"))
            .stdout(predicate::str::contains("--clear-cache"))
            .stdout(predicate::str::contains("--buildpack"));
    }

    #[test]
    fn config_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        pack()
            .args(["config", "path", "--config"])
            .arg(&path)
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show_defaults() {
        let temp = TempDir::new().unwrap();
        pack()
            .args(["config", "show", "--config"])
            .arg(temp.path().join("config.toml"))
            .assert()
            .success()
            .stdout(predicate::str::contains("[build]"))
            .stdout(predicate::str::contains("packs/samples:rc"));
    }

    #[test]
    fn config_set_persists() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");

        pack()
            .args(["config", "set", "engine.kind", "podman", "--config"])
            .arg(&path)
            .assert()
            .success();

        pack()
            .args(["config", "set-default-builder", "myorg/builder:1", "--config"])
            .arg(&path)
            .assert()
            .success();

        pack()
            .args(["config", "show", "--config"])
            .arg(&path)
            .assert()
            .success()
            .stdout(predicate::str::contains("kind = \"podman\""))
            .stdout(predicate::str::contains("myorg/builder:1"));
    }

    #[test]
    fn config_set_unknown_key() {
        let temp = TempDir::new().unwrap();
        pack()
            .args(["config", "set", "vm.name", "x", "--config"])
            .arg(temp.path().join("config.toml"))
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown config key"));
    }

    #[test]
    fn build_missing_app_dir() {
        let temp = TempDir::new().unwrap();
        pack()
            .args(["build", "myorg/app", "--path"])
            .arg(temp.path().join("missing"))
            .args(["--config"])
            .arg(temp.path().join("config.toml"))
            .assert()
            .failure()
            .stderr(predicate::str::contains("does not exist"));
    }

    #[test]
    fn invalid_config_file_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[engine]\nkind = 42\n").unwrap();
        pack()
            .args(["config", "show", "--config"])
            .arg(&path)
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"));
    }
}

mod pipeline_tests {
    use crate::fake::{FakeRuntime, SOCKET};
    use pack::build::{BuildConfig, BuildFactory, BuildFlags};
    use pack::cancel::Cancellation;
    use pack::config::{CacheBackend, Config};
    use pack::credentials::{StaticCredentials, REGISTRY_AUTH_ENV};
    use pack::error::{ErrorKind, PackError};
    use pack::lifecycle::{AccessMode, PhaseName, GROUP_PATH};
    use pack::logging::MemorySink;
    use pack::metadata::{
        AppImageMetadata, BuildpackLayers, LayerMetadata, APP_METADATA_LABEL,
        BUILDER_METADATA_LABEL, RUN_IMAGE_LABEL, STACK_LABEL,
    };
    use pack::orchestration::ImageInfo;
    use pack::resolver::{RunImageResolver, RunImageSelection};
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    const BUILDER: &str = "myorg/builder";
    const RUN_IMAGE: &str = "myorg/run";
    const MIRROR: &str = "registry.example.com/myorg/run";
    const STACK: &str = "io.buildpacks.stacks.bionic";
    const NODEJS: &str = "io.buildpacks.samples.nodejs";

    const GROUP: &str = r#"
        [[buildpacks]]
        id = "io.buildpacks.samples.nodejs"
        version = "0.0.1"
    "#;

    fn image(labels: &[(&str, &str)], env: &[&str]) -> ImageInfo {
        let mut info = ImageInfo::default();
        for (k, v) in labels {
            info.config.labels.insert(k.to_string(), v.to_string());
        }
        info.config.env = env.iter().map(|e| e.to_string()).collect();
        info
    }

    fn builder_metadata() -> String {
        serde_json::json!({
            "runImage": { "image": RUN_IMAGE, "mirrors": [MIRROR] },
            "buildpacks": [{ "id": NODEJS, "version": "0.0.1", "latest": true }]
        })
        .to_string()
    }

    fn builder_image() -> ImageInfo {
        image(
            &[(STACK_LABEL, STACK), (BUILDER_METADATA_LABEL, &builder_metadata())],
            &["PACK_USER_ID=1000", "PACK_GROUP_ID=1001"],
        )
    }

    fn layers(entries: &[(&str, &str)]) -> AppImageMetadata {
        AppImageMetadata {
            buildpacks: vec![BuildpackLayers {
                id: NODEJS.to_string(),
                version: None,
                layers: entries
                    .iter()
                    .map(|(name, sha)| {
                        (
                            name.to_string(),
                            LayerMetadata {
                                sha: sha.to_string(),
                                launch: true,
                                ..Default::default()
                            },
                        )
                    })
                    .collect::<BTreeMap<_, _>>(),
            }],
            ..Default::default()
        }
    }

    struct Harness {
        runtime: Arc<FakeRuntime>,
        sink: Arc<MemorySink>,
        config: Config,
        app: TempDir,
    }

    impl Harness {
        fn new() -> Self {
            let runtime = Arc::new(FakeRuntime::default());
            runtime.add_image(BUILDER, builder_image());
            runtime.add_image(RUN_IMAGE, image(&[(STACK_LABEL, STACK)], &[]));
            runtime.add_image(MIRROR, image(&[(STACK_LABEL, STACK)], &[]));
            runtime
                .state()
                .files
                .insert(GROUP_PATH.to_string(), GROUP.to_string());

            let app = TempDir::new().unwrap();
            std::fs::write(app.path().join("package.json"), "{}").unwrap();

            Self {
                runtime,
                sink: Arc::new(MemorySink::default()),
                config: Config::default(),
                app,
            }
        }

        fn flags(&self) -> BuildFlags {
            BuildFlags {
                app_dir: Some(self.app.path().to_path_buf()),
                builder: Some(BUILDER.to_string()),
                repo_name: Some("myorg/app".to_string()),
                ..Default::default()
            }
        }

        async fn configure(&self, flags: BuildFlags) -> Result<BuildConfig, PackError> {
            let credentials = StaticCredentials::anonymous()
                .with("registry.example.com", "Basic cmVnOnB3")
                .with("other.example.com", "Basic b3RoZXI6cHc=");
            BuildFactory::new(
                self.runtime.clone(),
                self.config.clone(),
                Arc::new(credentials),
                self.sink.clone(),
            )
            .build_config_from_flags(flags)
            .await
        }

        async fn build(&self, flags: BuildFlags) -> Result<pack::build::BuildOutcome, PackError> {
            self.configure(flags).await?.run(&Cancellation::never()).await
        }

        fn assert_released(&self) {
            assert_eq!(self.runtime.live_containers(), 0, "containers left behind");
            assert!(
                !self
                    .runtime
                    .volumes()
                    .iter()
                    .any(|v| v.starts_with("pack-workspace-")),
                "workspace volume left behind"
            );
            assert!(
                !self
                    .runtime
                    .state()
                    .images
                    .keys()
                    .any(|i| i.starts_with("pack.local/builder/")),
                "ephemeral builder left behind"
            );
        }
    }

    fn args_of(runtime: &FakeRuntime, program: &str) -> Vec<String> {
        runtime.created(program)[0].command[1..].to_vec()
    }

    #[tokio::test]
    async fn phases_run_in_order_with_ownership_handoffs() {
        let h = Harness::new();
        let outcome = h.build(h.flags()).await.unwrap();

        assert_eq!(
            h.runtime.started(),
            vec![
                "chown", "detector", "restorer", "analyzer", "chown", "builder", "chown",
                "exporter", "cacher"
            ]
        );
        assert_eq!(outcome.repo_name, "myorg/app");
        assert_eq!(outcome.run_image, RUN_IMAGE);
        assert_eq!(outcome.group.buildpacks[0].id, NODEJS);
        assert!(h.sink.stdout().contains(&"detector running".to_string()));
        h.assert_released();
    }

    #[tokio::test]
    async fn app_and_launch_dir_owned_by_builder_identity() {
        let h = Harness::new();
        h.build(h.flags()).await.unwrap();

        let chowns = h.runtime.created("chown");
        assert_eq!(chowns.len(), 3);
        assert_eq!(chowns[0].command, vec!["chown", "-R", "1000:1001", "/workspace/app"]);
        assert_eq!(chowns[1].command[3], "/workspace");
        // The last chown hands built layers over before the exporter starts
        assert_eq!(chowns[2].command[3], "/workspace");
        let events = h.runtime.events();
        let last_chown = events.iter().rposition(|e| e == "start chown").unwrap();
        let exporter = events.iter().position(|e| e == "start exporter").unwrap();
        assert!(last_chown < exporter);
        assert!(chowns.iter().all(|c| c.config.user.as_deref() == Some("root")));
    }

    #[tokio::test]
    async fn phase_arguments() {
        let h = Harness::new();
        h.build(h.flags()).await.unwrap();

        assert_eq!(
            args_of(&h.runtime, "detector"),
            vec![
                "-buildpacks", "/buildpacks", "-order", "/buildpacks/order.toml", "-group",
                "/workspace/group.toml", "-plan", "/workspace/plan.toml"
            ]
        );
        assert_eq!(
            args_of(&h.runtime, "analyzer"),
            vec!["-layers", "/workspace", "-group", "/workspace/group.toml", "-daemon", "myorg/app"]
        );
        assert_eq!(
            args_of(&h.runtime, "builder"),
            vec![
                "-buildpacks", "/buildpacks", "-layers", "/workspace", "-group",
                "/workspace/group.toml", "-plan", "/workspace/plan.toml", "-platform", "/platform"
            ]
        );
        let detector = &h.runtime.created("detector")[0];
        assert_eq!(detector.command[0], "/lifecycle/detector");
        assert!(detector.config.volumes[0].ends_with(":/workspace"));
    }

    #[tokio::test]
    async fn undetectable_app_fails_with_status_six() {
        let h = Harness::new();
        h.runtime.state().exit_codes.insert("detector".to_string(), 6);

        let err = h.build(h.flags()).await.unwrap_err();

        assert_eq!(err.to_string(), "run detect container: failed with status code: 6");
        assert!(err.is_no_buildpack_group());
        assert_eq!(h.runtime.phases(), vec!["detector"]);
        h.assert_released();
    }

    #[tokio::test]
    async fn failed_phase_stops_pipeline_and_releases_workspace() {
        let h = Harness::new();
        h.runtime.state().exit_codes.insert("builder".to_string(), 1);

        let err = h.build(h.flags()).await.unwrap_err();

        assert_eq!(err.phase(), Some("build"));
        assert_eq!(err.exit_code(), Some(1));
        assert!(err.to_string().starts_with("run build container"));
        assert_eq!(
            h.runtime.phases(),
            vec!["detector", "restorer", "analyzer", "builder"]
        );
        h.assert_released();
    }

    #[tokio::test]
    async fn stack_mismatch_rejected_before_any_container() {
        let h = Harness::new();
        h.runtime
            .add_image(RUN_IMAGE, image(&[(STACK_LABEL, "io.buildpacks.stacks.other")], &[]));

        let err = h.configure(h.flags()).await.err().unwrap();

        assert!(matches!(err, PackError::StackMismatch { .. }));
        assert!(err.to_string().contains("does not match stack"));
        assert!(h.runtime.state().created.is_empty());
    }

    #[tokio::test]
    async fn builder_without_stack_label_rejected() {
        let h = Harness::new();
        h.runtime.add_image(
            BUILDER,
            image(&[(BUILDER_METADATA_LABEL, &builder_metadata())], &[]),
        );

        let err = h.configure(h.flags()).await.err().unwrap();

        assert!(matches!(err.root(), PackError::MissingStackLabel { .. }));
        assert_eq!(err.kind(), ErrorKind::Resolution);
    }

    #[tokio::test]
    async fn builder_without_metadata_rejected() {
        let h = Harness::new();
        h.runtime.add_image(BUILDER, image(&[(STACK_LABEL, STACK)], &[]));

        let err = h.configure(h.flags()).await.err().unwrap();

        assert!(matches!(err, PackError::BuilderMetadataMissing { .. }));
    }

    #[tokio::test]
    async fn missing_builder_image() {
        let h = Harness::new();
        let mut flags = h.flags();
        flags.builder = Some("myorg/missing".to_string());
        flags.no_pull = true;

        let err = h.configure(flags).await.err().unwrap();

        assert!(matches!(err, PackError::ImageNotFound(ref i) if i == "myorg/missing"));
    }

    #[tokio::test]
    async fn missing_identity_fails_before_detect() {
        let h = Harness::new();
        h.runtime.add_image(
            BUILDER,
            image(
                &[(STACK_LABEL, STACK), (BUILDER_METADATA_LABEL, &builder_metadata())],
                &["PACK_GROUP_ID=1000"],
            ),
        );

        let err = h.build(h.flags()).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Identity);
        assert!(err.to_string().contains("get pack uid and gid"));
        assert!(h.runtime.started().is_empty());
        h.assert_released();
    }

    #[tokio::test]
    async fn daemon_mode_mounts_socket() {
        let h = Harness::new();
        h.build(h.flags()).await.unwrap();

        for program in ["analyzer", "exporter", "restorer", "cacher"] {
            let created = &h.runtime.created(program)[0];
            assert!(
                created.config.volumes.contains(&format!("{}:{}", SOCKET, SOCKET)),
                "{} lacks the socket",
                program
            );
            assert_eq!(created.config.user.as_deref(), Some("root"));
            assert!(!created.config.env.contains_key(REGISTRY_AUTH_ENV));
        }
        for program in ["detector", "builder"] {
            let created = &h.runtime.created(program)[0];
            assert!(!created.config.volumes.iter().any(|v| v.starts_with(SOCKET)));
            assert_eq!(created.config.user, None);
        }
    }

    #[tokio::test]
    async fn publish_mode_passes_scoped_credentials() {
        let h = Harness::new();
        let mut flags = h.flags();
        flags.repo_name = Some("registry.example.com/myorg/app".to_string());
        flags.publish = true;

        let outcome = h.build(flags).await.unwrap();

        assert_eq!(outcome.run_image, MIRROR);
        assert!(outcome.report.is_none());

        for program in ["analyzer", "exporter"] {
            let created = &h.runtime.created(program)[0];
            let auth: BTreeMap<String, String> =
                serde_json::from_str(&created.config.env[REGISTRY_AUTH_ENV]).unwrap();
            assert_eq!(auth.len(), 1);
            assert_eq!(auth["registry.example.com"], "Basic cmVnOnB3");
            assert!(!created.config.volumes.iter().any(|v| v.starts_with(SOCKET)));
        }

        let exporter_args = args_of(&h.runtime, "exporter");
        assert!(!exporter_args.contains(&"-daemon".to_string()));
        assert_eq!(exporter_args.last().unwrap(), "registry.example.com/myorg/app");
    }

    #[tokio::test]
    async fn publish_requires_remote_run_image() {
        let h = Harness::new();
        h.runtime.state().images.remove(MIRROR);
        let mut flags = h.flags();
        flags.repo_name = Some("registry.example.com/myorg/app".to_string());
        flags.publish = true;

        let err = h.configure(flags).await.err().unwrap();

        assert!(matches!(err, PackError::RunImageNotFound { remote: true, .. }));
        assert_eq!(err.to_string(), format!("remote run image {} does not exist", MIRROR));
    }

    #[tokio::test]
    async fn builder_selected_run_image_is_labelled() {
        let h = Harness::new();
        h.build(h.flags()).await.unwrap();

        let args = args_of(&h.runtime, "exporter");
        assert_eq!(&args[..2], &["-image".to_string(), RUN_IMAGE.to_string()]);
        assert!(args.contains(&format!("-run-image-label={}", RUN_IMAGE)));
        assert!(args.contains(&"-daemon".to_string()));
        assert_eq!(
            h.runtime.image_label("myorg/app", RUN_IMAGE_LABEL).as_deref(),
            Some(RUN_IMAGE)
        );
    }

    #[tokio::test]
    async fn validated_run_image_keeps_inspect_details() {
        let h = Harness::new();
        let mut info = image(&[(STACK_LABEL, STACK)], &[]);
        info.repo_digests = vec![format!("{}@sha256:run", RUN_IMAGE)];
        info.rootfs.layers = vec!["sha256:base".to_string(), "sha256:top".to_string()];
        h.runtime.add_image(RUN_IMAGE, info);

        let resolver = RunImageResolver::new(h.runtime.as_ref(), &h.config);
        let selection = RunImageSelection {
            image: RUN_IMAGE.to_string(),
            locally_configured: false,
        };
        let resolved = resolver
            .validate(selection, STACK, BUILDER, false, false)
            .await
            .unwrap();

        assert_eq!(resolved.stack, STACK);
        assert_eq!(resolved.info.digest(), Some("sha256:run"));
        assert_eq!(resolved.info.top_layer(), Some("sha256:top"));
        assert!(!resolved.locally_configured);
    }

    #[tokio::test]
    async fn user_run_image_is_not_labelled() {
        let h = Harness::new();
        h.runtime
            .add_image("myorg/custom-run", image(&[(STACK_LABEL, STACK)], &[]));
        let mut flags = h.flags();
        flags.run_image = Some("myorg/custom-run".to_string());

        let outcome = h.build(flags).await.unwrap();

        assert_eq!(outcome.run_image, "myorg/custom-run");
        let args = args_of(&h.runtime, "exporter");
        assert_eq!(args[1], "myorg/custom-run");
        assert!(!args.iter().any(|a| a.starts_with("-run-image-label")));
        assert!(h.runtime.has_image("myorg/app"));
        assert_eq!(h.runtime.image_label("myorg/app", RUN_IMAGE_LABEL), None);
    }

    #[tokio::test]
    async fn local_mirror_is_not_labelled() {
        let mut h = Harness::new();
        h.runtime
            .add_image("localhost:5000/myorg/run", image(&[(STACK_LABEL, STACK)], &[]));
        h.config
            .set_run_image_mirrors(RUN_IMAGE, vec!["localhost:5000/myorg/run".to_string()]);
        let mut flags = h.flags();
        flags.repo_name = Some("localhost:5000/myorg/app".to_string());

        let outcome = h.build(flags).await.unwrap();

        assert_eq!(outcome.run_image, "localhost:5000/myorg/run");
        let args = args_of(&h.runtime, "exporter");
        assert!(!args.iter().any(|a| a.starts_with("-run-image-label")));
        assert_eq!(
            h.runtime.image_label("localhost:5000/myorg/app", RUN_IMAGE_LABEL),
            None
        );
    }

    #[tokio::test]
    async fn export_reports_reused_layers() {
        let h = Harness::new();
        {
            let mut state = h.runtime.state();
            let previous = layers(&[("node_modules", "sha256:aaa"), ("nodejs", "sha256:old")]);
            let mut info = ImageInfo::default();
            info.config
                .labels
                .insert(APP_METADATA_LABEL.to_string(), previous.to_label().unwrap());
            state.images.insert("myorg/app".to_string(), info);
            state.exported = Some(layers(&[
                ("node_modules", "sha256:aaa"),
                ("nodejs", "sha256:new"),
            ]));
        }

        let outcome = h.build(h.flags()).await.unwrap();

        let report = outcome.report.unwrap();
        assert_eq!(report.reused(), 1);
        assert_eq!(report.rebuilt(), 1);
        let reused = report.layers.iter().find(|l| l.reused).unwrap();
        assert_eq!(reused.layer, "node_modules");
    }

    #[tokio::test]
    async fn malformed_previous_metadata_treated_as_first_build() {
        let h = Harness::new();
        {
            let mut state = h.runtime.state();
            state.images.insert(
                "myorg/app".to_string(),
                image(&[(APP_METADATA_LABEL, "{not json")], &[]),
            );
            state.exported = Some(layers(&[("node_modules", "sha256:aaa")]));
        }

        let outcome = h.build(h.flags()).await.unwrap();

        let report = outcome.report.unwrap();
        assert_eq!(report.reused(), 0);
        assert_eq!(report.rebuilt(), 1);
    }

    #[tokio::test]
    async fn clear_cache_happens_before_detect() {
        let h = Harness::new();
        let mut flags = h.flags();
        flags.clear_cache = true;

        let build = h.configure(flags).await.unwrap();
        let cache = build.cache.image().to_string();
        build.run(&Cancellation::never()).await.unwrap();

        let events = h.runtime.events();
        let cleared = events
            .iter()
            .position(|e| *e == format!("image_remove {}", cache))
            .unwrap();
        let detected = events.iter().position(|e| e == "start detector").unwrap();
        assert!(cleared < detected);
    }

    #[tokio::test]
    async fn failed_cache_clear_skips_detect() {
        let h = Harness::new();
        h.runtime.state().fail_image_remove = true;
        let mut flags = h.flags();
        flags.clear_cache = true;

        let err = h.build(flags).await.unwrap_err();

        assert!(err.to_string().starts_with("clearing cache"));
        assert_eq!(err.kind(), ErrorKind::Cache);
        assert!(h.runtime.started().iter().all(|p| p == "chown"));
    }

    #[tokio::test]
    async fn volume_cache_mounts_cache_dir() {
        let mut h = Harness::new();
        h.config.cache.backend = CacheBackend::Volume;

        let build = h.configure(h.flags()).await.unwrap();
        let cache = build.cache.image().to_string();
        build.run(&Cancellation::never()).await.unwrap();

        for program in ["restorer", "cacher"] {
            let created = &h.runtime.created(program)[0];
            assert_eq!(created.command[1..], ["-path=/cache".to_string()]);
            assert!(created.config.volumes.contains(&format!("{}:/cache", cache)));
            assert_eq!(created.config.user, None);
        }
        assert!(h.runtime.volumes().contains(&cache));
        h.assert_released();
    }

    #[tokio::test]
    async fn image_cache_args() {
        let h = Harness::new();
        let build = h.configure(h.flags()).await.unwrap();
        let cache = build.cache.image().to_string();
        assert!(cache.starts_with("pack-cache-"));
        build.run(&Cancellation::never()).await.unwrap();

        assert_eq!(args_of(&h.runtime, "restorer"), vec![format!("-image={}", cache)]);
        assert_eq!(args_of(&h.runtime, "cacher"), vec![format!("-image={}", cache)]);
    }

    #[tokio::test]
    async fn env_file_staged_into_ephemeral_builder() {
        let h = Harness::new();
        let env_file = h.app.path().join("build.env");
        std::fs::write(&env_file, "VAR1=value1\n\nVAR2=with=equals\n").unwrap();
        let mut flags = h.flags();
        flags.env_file = Some(env_file);

        h.build(flags).await.unwrap();

        let copied = h.runtime.state().copied.clone();
        assert_eq!(copied["/platform/env/VAR1"], "value1");
        assert_eq!(copied["/platform/env/VAR2"], "with=equals");

        let builder = &h.runtime.created("builder")[0];
        assert!(builder.config.image.starts_with("pack.local/builder/"));
        h.assert_released();
    }

    #[tokio::test]
    async fn directory_buildpack_replaces_order() {
        let h = Harness::new();
        let bp = TempDir::new().unwrap();
        std::fs::write(
            bp.path().join("buildpack.toml"),
            format!(
                "[buildpack]\nid = \"local/bp\"\nversion = \"1.0.0\"\n\n[[stacks]]\nid = \"{}\"\n",
                STACK
            ),
        )
        .unwrap();
        std::fs::create_dir_all(bp.path().join("bin")).unwrap();
        std::fs::write(bp.path().join("bin").join("detect"), "#!/bin/sh\n").unwrap();

        let mut flags = h.flags();
        flags.buildpacks = vec![bp.path().to_string_lossy().to_string(), NODEJS.to_string()];

        h.build(flags).await.unwrap();

        let copied = h.runtime.state().copied.clone();
        assert!(copied.contains_key("/buildpacks/local_bp/1.0.0/bin/detect"));
        let order = &copied["/buildpacks/order.toml"];
        assert!(order.contains("local/bp"));
        assert!(order.contains(NODEJS));
    }

    #[tokio::test]
    async fn buildpack_for_other_stack_rejected() {
        let h = Harness::new();
        let bp = TempDir::new().unwrap();
        std::fs::write(
            bp.path().join("buildpack.toml"),
            "[buildpack]\nid = \"local/bp\"\nversion = \"1.0.0\"\n\n[[stacks]]\nid = \"other\"\n",
        )
        .unwrap();
        let mut flags = h.flags();
        flags.buildpacks = vec![bp.path().to_string_lossy().to_string()];

        let err = h.configure(flags).await.err().unwrap();

        assert!(matches!(err, PackError::BuildpackStackUnsupported { .. }));
    }

    #[tokio::test]
    async fn detect_can_run_twice() {
        let h = Harness::new();
        let build = h.configure(h.flags()).await.unwrap();
        let cancel = Cancellation::never();
        let mut lifecycle = build.new_lifecycle(&cancel).await.unwrap();

        let first = build.detect(&lifecycle, &cancel).await.unwrap();
        let second = build.detect(&lifecycle, &cancel).await.unwrap();
        lifecycle.cleanup().await;

        assert_eq!(first, second);
        assert_eq!(h.runtime.phases(), vec!["detector", "detector"]);
        h.assert_released();
    }

    #[tokio::test]
    async fn cancellation_kills_running_phase() {
        let h = Harness::new();
        h.runtime.state().hang.insert("builder".to_string());
        let build = h.configure(h.flags()).await.unwrap();
        let (handle, cancel) = Cancellation::new();

        let runtime = h.runtime.clone();
        let task = tokio::spawn(async move { build.run(&cancel).await });

        for _ in 0..200 {
            if runtime.started().contains(&"builder".to_string()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        handle.cancel();

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err.root(), PackError::PhaseCancelled { phase } if phase == "build"));
        assert_eq!(h.runtime.state().killed.len(), 1);
        assert!(!h.runtime.phases().contains(&"exporter".to_string()));
        h.assert_released();
    }

    #[tokio::test]
    async fn dropped_resources_removed_in_background() {
        let h = Harness::new();
        let build = h.configure(h.flags()).await.unwrap();
        let cancel = Cancellation::never();
        let lifecycle = build.new_lifecycle(&cancel).await.unwrap();

        assert_eq!(lifecycle.phase_image(), BUILDER);
        assert!(h.runtime.volumes().contains(lifecycle.workspace_volume()));

        let phase = lifecycle
            .new_phase(PhaseName::Detect, Vec::new(), AccessMode::None)
            .await
            .unwrap();
        assert_eq!(h.runtime.live_containers(), 1);
        let created = h.runtime.created("detector");
        assert_eq!(phase.container_id(), Some(created[0].id.as_str()));
        assert_eq!(created[0].config.image, lifecycle.phase_image());
        drop(phase);
        drop(lifecycle);

        for _ in 0..100 {
            if h.runtime.live_containers() == 0 && h.runtime.volumes().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        h.assert_released();
    }
}
