//! Container and image lifecycle on top of [`ContainerEngine`].

use log::{debug, info, warn};
use pe_image_name::ImageName;

use crate::engine::{ContainerEngine, ContainerHandle, CreateArgs, EngineError, RunOptions};

/// Creates and starts a fresh container called `name` from `image`. A container left behind with
/// the same name is removed first.
pub fn ensure_container(
    engine: &dyn ContainerEngine,
    image: &ImageName,
    name: &str,
    options: &RunOptions,
) -> Result<ContainerHandle, EngineError> {
    if let Some(stale) = engine.find_container(name)? {
        warn!("removing existing container {name} ({stale})");
        engine.remove_container(&stale)?;
    }

    let id = engine.create_container(CreateArgs {
        image,
        name,
        options,
    })?;
    engine.start_container(&id)?;
    info!("started container {name} from {image}");
    debug!("container {name} has id {id}");

    Ok(ContainerHandle {
        id,
        name: name.to_owned(),
    })
}

/// Makes `image` available locally, pulling it when absent.
pub fn ensure_image(engine: &dyn ContainerEngine, image: &ImageName) -> Result<(), EngineError> {
    if engine.image_exists(image)? {
        debug!("image {image} is available locally");
        return Ok(());
    }
    info!("image {image} not found locally, pulling it");
    engine.pull(image)
}

/// Snapshots the container as `image` and returns the new image id.
pub fn commit(
    engine: &dyn ContainerEngine,
    container: &ContainerHandle,
    image: &ImageName,
) -> Result<String, EngineError> {
    let id = engine.commit(container, image)?;
    info!("committed {container} as {image}");
    Ok(id)
}

/// Removes the container when `enabled`. A failure to remove is returned to the caller.
pub fn cleanup(
    engine: &dyn ContainerEngine,
    container: &ContainerHandle,
    enabled: bool,
) -> Result<(), EngineError> {
    if !enabled {
        info!("leaving container {container} in place");
        return Ok(());
    }
    engine.remove_container(&container.id)?;
    info!("removed container {container}");
    Ok(())
}
