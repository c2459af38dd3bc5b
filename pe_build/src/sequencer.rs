//! Runs the workflow of every enabled variant, strictly one after the other.

use std::thread;

use log::{debug, info, warn};
use pe_image_name::ImageName;

use crate::{
    builder,
    config::{BuildConfig, Variant},
    engine::{ContainerEngine, ContainerHandle},
    lifecycle,
    remote::Remote,
    template::{Staging, Templates},
    workflow::{self, Action, Base, Workflow},
    Result,
};

/// An image committed (and pushed, if requested) by this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub variant: Variant,
    pub image: ImageName,
    pub image_id: String,
}

/// Builds every enabled variant. Stops at the first failure, leaving the failed container in place.
pub fn run(config: &BuildConfig, engine: &dyn ContainerEngine) -> Result<Vec<Published>> {
    let templates = Templates::new(&config.templates_dir);
    let mut published = Vec::new();

    for variant in Variant::ALL {
        if !config.variants.is_enabled(variant) {
            info!("skipping the {variant} image");
            continue;
        }
        let workflow = workflow::plan(config, &templates, variant)?;
        published.push(execute(config, engine, &templates, &workflow)?);
    }

    Ok(published)
}

fn prepare_base(
    config: &BuildConfig,
    engine: &dyn ContainerEngine,
    templates: &Templates,
    base: &Base,
) -> Result<()> {
    match base {
        Base::Recipe(_) => {
            builder::build_base_image(engine, config, templates)?;
        }
        Base::Parent {
            variant,
            image,
            built_this_run,
        } => {
            info!("layering on the {variant} image {image}");
            lifecycle::ensure_image(engine, image).map_err(|error| {
                let hint = if *built_this_run {
                    ""
                } else {
                    "\nhint: build it first, or pass --base-tag-version with the release counter of a published image"
                };
                format!("parent image {image} is not available: {error}{hint}")
            })?;
        }
    }
    Ok(())
}

fn run_steps(engine: &dyn ContainerEngine, container: &ContainerHandle, workflow: &Workflow) -> Result<()> {
    let staging = Staging::new()?;
    let remote = Remote::new(engine, container);
    let total = workflow.steps.len();

    for (index, step) in workflow.steps.iter().enumerate() {
        info!("[{container}] step {}/{total}: {}", index + 1, step.name);
        match &step.action {
            Action::Wait(duration) => thread::sleep(*duration),
            Action::Push(upload) => {
                let local = staging.write(&upload.file_name, &upload.content)?;
                remote.push_file(&step.name, &local, &upload.remote_path)?;
            }
            Action::Run(command) => {
                let result = remote.run(&step.name, command)?;
                debug!(
                    "[{container}] {} finished with exit code {} after {} lines of output",
                    step.name,
                    result.exit_code,
                    result.lines.len()
                );
            }
        }
    }
    Ok(())
}

fn execute(
    config: &BuildConfig,
    engine: &dyn ContainerEngine,
    templates: &Templates,
    workflow: &Workflow,
) -> Result<Published> {
    let variant = workflow.variant;
    info!("building the {variant} image {}", workflow.target);
    debug!(
        "{variant} steps: {}",
        workflow.step_names().collect::<Vec<_>>().join(", ")
    );

    prepare_base(config, engine, templates, &workflow.base)?;

    let container = lifecycle::ensure_container(
        engine,
        workflow.base.image(),
        &workflow.container_name,
        &workflow.options,
    )?;

    run_steps(engine, &container, workflow).inspect_err(|_| {
        warn!("container {container} was left in place for inspection");
    })?;

    let image_id = lifecycle::commit(engine, &container, &workflow.target)?;
    if config.push {
        engine.push(&workflow.target)?;
        info!("pushed {}", workflow.target);
    }
    lifecycle::cleanup(engine, &container, config.cleanup)?;

    Ok(Published {
        variant,
        image: workflow.target.clone(),
        image_id,
    })
}
