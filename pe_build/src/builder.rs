//! Building the base image from the recipe template.

use std::{fmt, io, path::PathBuf};

use log::info;
use pe_image_name::{ImageName, InvalidImageName};

use crate::{
    config::BuildConfig,
    engine::{self, ContainerEngine, EngineError},
    template::{self, Staging, TemplateError, Templates},
};

#[derive(Debug)]
pub enum BuildError {
    TemplateMissing(PathBuf),
    Template(TemplateError),
    /// The product tarball is not in the build context.
    MissingMedia(PathBuf),
    EngineUnreachable(EngineError),
    Failed(Box<dyn std::error::Error + Send + Sync>),
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::TemplateMissing(path) => write!(
                f,
                "build recipe template {path:?} does not exist\n\
                hint: pass --templates-dir to point at the directory holding Dockerfile.tera"
            ),
            BuildError::Template(error) => error.fmt(f),
            BuildError::MissingMedia(path) => write!(
                f,
                "Puppet Enterprise tarball {path:?} not found\n\
                hint: download it from https://puppet.com/download-puppet-enterprise and place it \
                in the directory passed with --media-dir"
            ),
            BuildError::EngineUnreachable(error) => error.fmt(f),
            BuildError::Failed(error) => write!(f, "failed to build the base image: {error}"),
        }
    }
}

impl std::error::Error for BuildError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BuildError::TemplateMissing(_) | BuildError::MissingMedia(_) => None,
            BuildError::Template(error) => Some(error),
            BuildError::EngineUnreachable(error) => Some(error),
            BuildError::Failed(error) => Some(error.as_ref()),
        }
    }
}

impl From<TemplateError> for BuildError {
    fn from(value: TemplateError) -> Self {
        match value {
            TemplateError::Missing { path } => BuildError::TemplateMissing(path),
            error => BuildError::Template(error),
        }
    }
}

impl From<EngineError> for BuildError {
    fn from(value: EngineError) -> Self {
        if value.is_unreachable() {
            BuildError::EngineUnreachable(value)
        } else {
            BuildError::Failed(Box::new(value))
        }
    }
}

impl From<io::Error> for BuildError {
    fn from(value: io::Error) -> Self {
        BuildError::Failed(Box::new(value))
    }
}

impl From<InvalidImageName> for BuildError {
    fn from(value: InvalidImageName) -> Self {
        BuildError::Failed(Box::new(value))
    }
}

/// Renders the recipe, builds it with the media directory as context and returns the name of the
/// resulting image. The rendered recipe is deleted whatever the outcome.
pub fn build_base_image(
    engine: &dyn ContainerEngine,
    config: &BuildConfig,
    templates: &Templates,
) -> Result<ImageName, BuildError> {
    engine.ping()?;

    let dockerfile = templates.render(template::DOCKERFILE, &template::context(config))?;

    let tarball = config.pe_tarball();
    if !tarball.is_file() {
        return Err(BuildError::MissingMedia(tarball));
    }

    let image = config.base_image()?;
    let staging = Staging::new()?;
    let dockerfile = staging.write("Dockerfile", dockerfile)?;

    info!("building {image} from {dockerfile:?}");
    engine.build(engine::BuildArgs {
        dockerfile: &dockerfile,
        context: &config.media_dir,
        image: &image,
    })?;

    Ok(image)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use clap::Parser;

    use super::*;
    use crate::{cli::Cli, engine::fake::FakeEngine};

    struct Fixture {
        media: tempfile::TempDir,
        config: BuildConfig,
    }

    fn fixture(with_tarball: bool) -> Fixture {
        let media = tempfile::tempdir().unwrap();
        let cli = Cli::try_parse_from([
            "pe-build",
            "--pe-version",
            "2018.1.0",
            "--tag-version",
            "3",
            "--media-dir",
            media.path().to_str().unwrap(),
        ])
        .unwrap();
        let config = BuildConfig::resolve(cli.args).unwrap();
        if with_tarball {
            fs::write(config.pe_tarball(), b"").unwrap();
        }
        Fixture { media, config }
    }

    fn templates() -> Templates {
        Templates::new(crate::config::DEFAULT_TEMPLATES_DIR)
    }

    #[test]
    fn builds_the_base_image() {
        let Fixture { media: _media, config } = fixture(true);
        let engine = FakeEngine::default();
        let image = build_base_image(&engine, &config, &templates()).unwrap();
        assert_eq!(image.to_string(), "pe_master_base:2018.1.0-3");
        assert_eq!(engine.calls_starting_with("build"), ["build pe_master_base:2018.1.0-3"]);
        let state = engine.state();
        assert!(state.dockerfiles[0].contains("ADD puppet-enterprise-2018.1.0-el-7-x86_64.tar.gz"));
    }

    #[test]
    fn missing_tarball_is_reported_before_building() {
        let Fixture { media: _media, config } = fixture(false);
        let engine = FakeEngine::default();
        let error = build_base_image(&engine, &config, &templates()).unwrap_err();
        assert!(matches!(error, BuildError::MissingMedia(_)));
        assert!(error.to_string().contains("--media-dir"));
        assert!(engine.calls_starting_with("build").is_empty());
    }

    #[test]
    fn missing_template_is_reported() {
        let Fixture { media: _media, config } = fixture(true);
        let empty = tempfile::tempdir().unwrap();
        let error =
            build_base_image(&FakeEngine::default(), &config, &Templates::new(empty.path()))
                .unwrap_err();
        assert!(matches!(error, BuildError::TemplateMissing(_)));
    }

    #[test]
    fn unreachable_engine_is_distinguished() {
        let Fixture { media: _media, config } = fixture(true);
        let error = build_base_image(&FakeEngine::default().unreachable(), &config, &templates())
            .unwrap_err();
        assert!(matches!(error, BuildError::EngineUnreachable(_)));
        assert!(error.to_string().contains("hint:"));
    }

    #[test]
    fn build_failure_is_generic() {
        let Fixture { media: _media, config } = fixture(true);
        let error = build_base_image(&FakeEngine::default().failing_build(), &config, &templates())
            .unwrap_err();
        assert!(matches!(error, BuildError::Failed(_)));
    }
}
