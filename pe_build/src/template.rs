//! Rendering of the files read from the templates directory.
//!
//! Templates use [Tera](https://keats.github.io/tera/) syntax. The variables available to every
//! template are produced by [`context`].

use std::{
    collections::BTreeMap,
    fmt, fs, io,
    path::PathBuf,
};

use log::debug;
use tera::{Context, Tera};

use crate::{
    config::{BuildConfig, Variant, CONSOLE_ADMIN_PASSWORD},
    shell,
};

pub const DOCKERFILE: &str = "Dockerfile.tera";
pub const CLASSIFY_SCRIPT: &str = "classify.sh.tera";

#[derive(Debug)]
pub enum TemplateError {
    Missing { path: PathBuf },
    Read { path: PathBuf, error: io::Error },
    Render { path: PathBuf, error: tera::Error },
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateError::Missing { path } => write!(
                f,
                "template {path:?} does not exist, pass --templates-dir to point at the templates directory"
            ),
            TemplateError::Read { path, error } => {
                write!(f, "failed to read template {path:?}: {error}")
            }
            TemplateError::Render { path, error } => {
                write!(f, "failed to render template {path:?}: {error}")?;
                let mut source = std::error::Error::source(error);
                while let Some(error) = source {
                    write!(f, ": {error}")?;
                    source = error.source();
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for TemplateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TemplateError::Missing { .. } => None,
            TemplateError::Read { error, .. } => Some(error),
            TemplateError::Render { error, .. } => Some(error),
        }
    }
}

pub struct Templates {
    dir: PathBuf,
}

impl Templates {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub fn render(&self, name: &str, context: &Context) -> Result<String, TemplateError> {
        let path = self.path(name);
        let source = match fs::read_to_string(&path) {
            Ok(source) => source,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                return Err(TemplateError::Missing { path })
            }
            Err(error) => return Err(TemplateError::Read { path, error }),
        };

        let rendered = Tera::one_off(&source, context, false)
            .map_err(|error| TemplateError::Render { path, error })?;
        debug!("rendered template {name} ({} bytes)", rendered.len());
        Ok(rendered)
    }
}

/// The variables shared by all templates.
pub fn context(config: &BuildConfig) -> Context {
    let variants: BTreeMap<&str, bool> = Variant::ALL
        .into_iter()
        .filter(|&variant| variant != Variant::Regular)
        .map(|variant| (variant.as_str(), config.variants.is_enabled(variant)))
        .chain([("r10k", config.r10k.is_some())])
        .collect();

    let mut context = Context::new();
    context.insert("pe_version", &config.pe_version);
    context.insert("pe_media", &config.pe_media());
    context.insert("hostname", &config.hostname);
    context.insert("short_hostname", config.short_hostname());
    context.insert("dns_alt_names", &config.dns_alt_names());
    context.insert("root_passwd", &config.root_passwd);
    // `root:<password>` quoted for a shell, as read by chpasswd.
    context.insert(
        "root_credentials",
        &shell::quote(&format!("root:{}", config.root_passwd)),
    );
    context.insert("console_admin_password", CONSOLE_ADMIN_PASSWORD);
    context.insert("variants", &variants);
    context
}

/// A private temporary directory holding rendered files until they have been pushed. Removed when
/// dropped.
pub struct Staging {
    dir: tempfile::TempDir,
}

impl Staging {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            dir: tempfile::Builder::new().prefix("pe-build-").tempdir()?,
        })
    }

    pub fn write(&self, name: &str, content: impl AsRef<[u8]>) -> io::Result<PathBuf> {
        let path = self.dir.path().join(name);
        fs::write(&path, content)?;
        debug!("staged {path:?}");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::cli::Cli;

    fn config(args: &[&str]) -> BuildConfig {
        let cli = Cli::try_parse_from(
            ["pe-build", "--pe-version", "2018.1.0", "--tag-version", "3"]
                .into_iter()
                .chain(args.iter().copied()),
        )
        .unwrap();
        BuildConfig::resolve(cli.args).unwrap()
    }

    #[test]
    fn renders_configuration_values() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("t.tera"),
            "{{ hostname }} {{ short_hostname }} [{{ dns_alt_names | join(sep=\",\") }}] \
             {% if variants.lowmem %}lowmem{% endif %}{% if variants.r10k %} r10k{% endif %}",
        )
        .unwrap();
        let templates = Templates::new(dir.path());
        let rendered = templates
            .render(
                "t.tera",
                &context(&config(&["--hostname", "puppet.megacorp.com", "--no-r10k"])),
            )
            .unwrap();
        assert_eq!(
            rendered,
            "puppet.megacorp.com puppet [puppet,puppet.megacorp.com] lowmem"
        );
    }

    #[test]
    fn missing_template_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let error = Templates::new(dir.path())
            .render(DOCKERFILE, &Context::new())
            .unwrap_err();
        assert!(matches!(error, TemplateError::Missing { .. }));
        assert!(error.to_string().contains("--templates-dir"));
    }

    #[test]
    fn undefined_variable_is_a_render_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("t.tera"), "{{ nope }}").unwrap();
        let error = Templates::new(dir.path())
            .render("t.tera", &Context::new())
            .unwrap_err();
        assert!(matches!(error, TemplateError::Render { .. }));
    }

    #[test]
    fn shipped_templates_render() {
        let templates = Templates::new(crate::config::DEFAULT_TEMPLATES_DIR);
        let context = context(&config(&[]));
        let dockerfile = templates.render(DOCKERFILE, &context).unwrap();
        assert!(dockerfile.contains("puppet-enterprise-2018.1.0-el-7-x86_64.tar.gz"));
        let pe_conf = templates.render("pe.conf.tera", &context).unwrap();
        assert!(pe_conf.contains("pe-puppet.localdomain"));
        let answers = templates
            .render("all-in-one.answers.txt.tera", &context)
            .unwrap();
        assert!(answers.contains("q_puppetmaster_certname=pe-puppet.localdomain"));
    }

    #[test]
    fn root_password_is_quoted_in_the_recipe() {
        let templates = Templates::new(crate::config::DEFAULT_TEMPLATES_DIR);
        let dockerfile = templates
            .render(
                DOCKERFILE,
                &context(&config(&["--root-passwd", "it's; touch /pwned"])),
            )
            .unwrap();
        assert!(dockerfile.contains(r"RUN echo 'root:it'\''s; touch /pwned' | chpasswd"));

        let dockerfile = templates.render(DOCKERFILE, &context(&config(&[]))).unwrap();
        assert!(dockerfile.contains("RUN echo root:root | chpasswd"));
    }

    #[test]
    fn staging_is_removed_on_drop() {
        let staging = Staging::new().unwrap();
        let path = staging.write("answers.txt", "x").unwrap();
        assert!(path.exists());
        let dir = path.parent().unwrap().to_owned();
        drop(staging);
        assert!(!dir.exists());
    }
}
