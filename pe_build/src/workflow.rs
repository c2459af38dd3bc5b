//! The ordered steps that turn a base image into the image of one variant.
//!
//! Planning is pure: templates are rendered and data serialised up front, nothing is sent to the
//! container engine. [`crate::sequencer`] executes the plans.

use std::time::Duration;

use pe_image_name::ImageName;

use crate::{
    classify,
    config::{BuildConfig, Variant},
    engine::{RunOptions, Volume},
    hiera,
    remote::{RemoteCommand, AGENT_LOCK},
    shell,
    template::{self, Templates},
    Result,
};

const DOCKER_SOCKET: &str = "/var/run/docker.sock";
const CGROUP: &str = "/sys/fs/cgroup";
const IMAGE_BUILD_MODULE: &str = "puppetlabs-image_build";
const R10K_CHECKOUT: &str = "/root/r10k-control";

/// A file rendered on the host and placed in the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    /// Name the file is staged under on the host.
    pub file_name: String,
    pub content: String,
    pub remote_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Sleep in the orchestrator, giving services in the container time to start.
    Wait(Duration),
    Push(FileUpload),
    Run(RemoteCommand),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub name: String,
    pub action: Action,
}

impl Step {
    fn new(name: impl Into<String>, action: Action) -> Self {
        Self {
            name: name.into(),
            action,
        }
    }

    fn run(name: impl Into<String>, command: RemoteCommand) -> Self {
        Self::new(name, Action::Run(command))
    }

    fn push(name: impl Into<String>, upload: FileUpload) -> Self {
        Self::new(name, Action::Push(upload))
    }
}

/// The image a variant's container is started from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Base {
    /// Built from the recipe template at the start of the workflow.
    Recipe(ImageName),
    /// Published by the parent variant, either earlier in this run or by a previous run.
    Parent {
        variant: Variant,
        image: ImageName,
        built_this_run: bool,
    },
}

impl Base {
    pub fn image(&self) -> &ImageName {
        match self {
            Base::Recipe(image) | Base::Parent { image, .. } => image,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workflow {
    pub variant: Variant,
    pub base: Base,
    pub container_name: String,
    pub options: RunOptions,
    pub target: ImageName,
    pub steps: Vec<Step>,
}

impl Workflow {
    pub fn step_names(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|step| step.name.as_str())
    }
}

fn run_options(config: &BuildConfig, variant: Variant) -> RunOptions {
    let mut volumes = vec![Volume::bind(CGROUP, CGROUP)];
    if variant == Variant::DockerBuild {
        volumes.push(Volume::bind(DOCKER_SOCKET, DOCKER_SOCKET));
    }
    RunOptions {
        hostname: config.hostname.clone(),
        privileged: true,
        volumes,
        env: vec![("container".to_owned(), "docker".to_owned())],
    }
}

/// `puppet agent -t` once no other agent run holds the lock.
fn converge() -> RemoteCommand {
    RemoteCommand::puppet_run("puppet agent -t").after_lock_clears(AGENT_LOCK)
}

fn base(config: &BuildConfig, variant: Variant) -> Result<Base> {
    let Some(parent) = config.parent(variant) else {
        return Ok(Base::Recipe(config.base_image()?));
    };
    // Variants run in order and the first failure ends the run, so an enabled parent has been
    // published with the current tag by the time its children start.
    let built_this_run = config.variants.is_enabled(parent);
    let tag_version = if built_this_run {
        config.tag_version.as_str()
    } else {
        config.parent_tag_version()
    };
    Ok(Base::Parent {
        variant: parent,
        image: config.image(parent, tag_version)?,
        built_this_run,
    })
}

fn boot_wait(config: &BuildConfig) -> Step {
    Step::new("wait for boot", Action::Wait(config.boot_wait))
}

fn regular_steps(config: &BuildConfig, templates: &Templates) -> Result<Vec<Step>> {
    let context = template::context(config);
    let installer = config.installer;
    let installer_config = templates.render(installer.template(), &context)?;
    let installer_file = installer
        .remote_path()
        .rsplit_once('/')
        .map_or(installer.remote_path(), |(_, name)| name);

    let mut steps = vec![
        boot_wait(config),
        Step::push(
            format!("upload {installer_file}"),
            FileUpload {
                file_name: installer_file.to_owned(),
                content: installer_config,
                remote_path: installer.remote_path().to_owned(),
            },
        ),
        Step::run(
            "install Puppet Enterprise",
            RemoteCommand::strict(format!(
                "cd {media} && PUPPET_HOSTNAME={hostname} ./puppet-enterprise-installer {flag} {path}",
                media = shell::quote(&format!("/root/{}", config.pe_media())),
                hostname = shell::quote(&config.hostname),
                flag = installer.flag(),
                path = installer.remote_path(),
            )),
        ),
        Step::run("converge after install", converge()),
    ];

    let mut script_context = context;
    script_context.insert("classifier_port", &classify::CLASSIFIER_PORT);
    script_context.insert("classifier_wait_secs", &classify::CLASSIFIER_WAIT_SECS);
    steps.push(Step::push(
        "upload classifier script",
        FileUpload {
            file_name: "classify.sh".to_owned(),
            content: templates.render(template::CLASSIFY_SCRIPT, &script_context)?,
            remote_path: classify::SCRIPT_PATH.to_owned(),
        },
    ));
    for delta in classify::regular_deltas() {
        let file_name = delta.file_name();
        let remote_path = format!("/root/{file_name}");
        steps.push(Step::push(
            format!("upload {} classification", delta.group),
            FileUpload {
                file_name,
                content: delta.to_json()?,
                remote_path: remote_path.clone(),
            },
        ));
        steps.push(Step::run(
            format!("classify {}", delta.group),
            RemoteCommand::strict(format!(
                "bash {script} {group} {delta}",
                script = classify::SCRIPT_PATH,
                group = shell::quote(delta.group),
                delta = shell::quote(&remote_path),
            )),
        ));
    }

    if let Some(r10k) = &config.r10k {
        steps.push(Step::run(
            "bootstrap r10k",
            RemoteCommand::strict(format!(
                "rm -rf {R10K_CHECKOUT} && {clone} && cd {R10K_CHECKOUT} && ./bootstrap.sh",
                clone = shell::quote_join(["git", "clone", r10k.url.as_str(), R10K_CHECKOUT]),
            )),
        ));
        steps.push(Step::run("converge after r10k", converge()));
    }

    steps.push(Step::run("final converge", converge()));
    Ok(steps)
}

fn lowmem_steps(config: &BuildConfig) -> Result<Vec<Step>> {
    Ok(vec![
        boot_wait(config),
        Step::push(
            "upload low-memory hiera data",
            FileUpload {
                file_name: "common.yaml".to_owned(),
                content: hiera::LowMemory::default().to_yaml()?,
                remote_path: hiera::COMMON_YAML.to_owned(),
            },
        ),
        Step::run("converge with low-memory settings", converge()),
    ])
}

fn dockerbuild_steps(config: &BuildConfig) -> Vec<Step> {
    vec![
        boot_wait(config),
        Step::run(
            "install image_build module",
            RemoteCommand::strict(format!("puppet module install {IMAGE_BUILD_MODULE}"))
                .after_lock_clears(AGENT_LOCK),
        ),
        Step::run("converge with image_build", converge()),
    ]
}

/// Plans the workflow of `variant`.
pub fn plan(config: &BuildConfig, templates: &Templates, variant: Variant) -> Result<Workflow> {
    let steps = match variant {
        Variant::Regular => regular_steps(config, templates)?,
        Variant::LowMem => lowmem_steps(config)?,
        Variant::DockerBuild => dockerbuild_steps(config),
    };
    Ok(Workflow {
        variant,
        base: base(config, variant)?,
        container_name: config.container_name(variant),
        options: run_options(config, variant),
        target: config.image(variant, &config.tag_version)?,
        steps,
    })
}
