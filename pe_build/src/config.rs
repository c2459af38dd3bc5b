use std::{fmt, path::PathBuf, time::Duration};

use pe_image_name::{publish_tag, Flavor, ImageName, InvalidImageName, Visibility, BASE_REPOSITORY};

use crate::cli::BuildArgs;

pub const DEFAULT_HOSTNAME: &str = "pe-puppet.localdomain";
pub const DEFAULT_ROOT_PASSWD: &str = "root";
pub const DEFAULT_R10K_CONTROL_URL: &str = "https://github.com/GeoffWilliams/r10k-control";
pub const DEFAULT_BOOT_WAIT_SECS: u64 = 5;
pub const DEFAULT_TEMPLATES_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/templates");
pub const DEFAULT_MEDIA_DIR: &str = ".";

/// Placeholder console credentials baked into the public images.
pub const CONSOLE_ADMIN_PASSWORD: &str = "aaaaaaaa";

/// Versions before this one only ship the answers-file installer.
const FIRST_PE_CONF_VERSION: semver::Version = semver::Version::new(2016, 2, 0);

#[derive(Debug, PartialEq, Eq)]
pub enum UsageError {
    MissingPeVersion,
    HyphenatedPeVersion(String),
    MissingTagVersion,
    NonNumericTagVersion(String),
    NonNumericBaseTagVersion(String),
    ConflictingR10k,
    RootPasswdControlCharacter,
    NothingToBuild,
    InvalidImageName(InvalidImageName),
}

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UsageError::MissingPeVersion => {
                f.write_str("You must specify a PE version to use, eg 2015.2.1")
            }
            UsageError::HyphenatedPeVersion(version) => write!(
                f,
                "PE versions are delimited by periods, not hyphens - eg use 2015.2.1 not 2015-2-1 (got {version:?})"
            ),
            UsageError::MissingTagVersion => f.write_str("You must specify a numeric tag for the image"),
            UsageError::NonNumericTagVersion(tag) => {
                write!(f, "You must specify a numeric tag for the image (got {tag:?})")
            }
            UsageError::NonNumericBaseTagVersion(tag) => write!(
                f,
                "You must specify a numeric tag for the base image (got {tag:?})"
            ),
            UsageError::ConflictingR10k => {
                f.write_str("--r10k-control and --no-r10k can not be used together")
            }
            UsageError::RootPasswdControlCharacter => {
                f.write_str("--root-passwd can not contain newlines or other control characters")
            }
            UsageError::NothingToBuild => f.write_str(
                "--no-regular, --no-lowmem and --no-dockerbuild together leave nothing to build",
            ),
            UsageError::InvalidImageName(error) => error.fmt(f),
        }
    }
}

impl std::error::Error for UsageError {}

impl From<InvalidImageName> for UsageError {
    fn from(value: InvalidImageName) -> Self {
        UsageError::InvalidImageName(value)
    }
}

/// Which installer invocation and configuration file the product version expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Installer {
    /// `puppet-enterprise-installer -c pe.conf`
    PeConf,
    /// `puppet-enterprise-installer -a answers.txt`, for versions before 2016.2.
    Answers,
}

impl Installer {
    pub const fn template(&self) -> &'static str {
        match self {
            Installer::PeConf => "pe.conf.tera",
            Installer::Answers => "all-in-one.answers.txt.tera",
        }
    }

    pub const fn remote_path(&self) -> &'static str {
        match self {
            Installer::PeConf => "/root/pe.conf",
            Installer::Answers => "/root/answers.txt",
        }
    }

    pub const fn flag(&self) -> &'static str {
        match self {
            Installer::PeConf => "-c",
            Installer::Answers => "-a",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Regular,
    LowMem,
    DockerBuild,
}

impl Variant {
    pub const ALL: [Variant; 3] = [Variant::Regular, Variant::LowMem, Variant::DockerBuild];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Variant::Regular => "regular",
            Variant::LowMem => "lowmem",
            Variant::DockerBuild => "dockerbuild",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Variants {
    pub regular: bool,
    pub lowmem: bool,
    pub dockerbuild: bool,
}

impl Variants {
    pub const fn is_enabled(&self, variant: Variant) -> bool {
        match variant {
            Variant::Regular => self.regular,
            Variant::LowMem => self.lowmem,
            Variant::DockerBuild => self.dockerbuild,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct R10kControl {
    pub url: String,
}

/// The resolved options of a run. Constructed once by [`BuildConfig::resolve`] and never modified.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub pe_version: String,
    pub tag_version: String,
    pub base_tag_version: Option<String>,
    pub hostname: String,
    pub visibility: Visibility,
    pub root_passwd: String,
    pub r10k: Option<R10kControl>,
    pub variants: Variants,
    pub cleanup: bool,
    pub installer: Installer,
    pub templates_dir: PathBuf,
    pub media_dir: PathBuf,
    pub namespace: Option<String>,
    pub push: bool,
    pub boot_wait: Duration,
    pub report: Option<PathBuf>,
}

fn contains_digit(value: &str) -> bool {
    value.bytes().any(|b| b.is_ascii_digit())
}

impl BuildConfig {
    /// Validates the parsed arguments and applies defaults. Nothing is touched outside of the
    /// returned value.
    pub fn resolve(args: BuildArgs) -> Result<Self, UsageError> {
        let BuildArgs {
            pe_version,
            tag_version,
            base_tag_version,
            hostname,
            root_passwd,
            r10k_control,
            no_r10k,
            no_regular,
            no_lowmem,
            no_dockerbuild,
            no_cleanup,
            old_installer,
            debug: _,
            templates_dir,
            media_dir,
            namespace,
            push,
            boot_wait,
            report,
        } = args;

        let pe_version = pe_version.ok_or(UsageError::MissingPeVersion)?;
        if pe_version.contains('-') {
            return Err(UsageError::HyphenatedPeVersion(pe_version));
        }

        let tag_version = tag_version.ok_or(UsageError::MissingTagVersion)?;
        if !contains_digit(&tag_version) {
            return Err(UsageError::NonNumericTagVersion(tag_version));
        }

        if let Some(base) = base_tag_version.as_deref() {
            if !contains_digit(base) {
                return Err(UsageError::NonNumericBaseTagVersion(base.to_owned()));
            }
        }

        if r10k_control.is_some() && no_r10k {
            return Err(UsageError::ConflictingR10k);
        }

        // The password lands on a single line of the build recipe.
        if root_passwd.chars().any(char::is_control) {
            return Err(UsageError::RootPasswdControlCharacter);
        }

        let variants = Variants {
            regular: !no_regular,
            lowmem: !no_lowmem,
            dockerbuild: !no_dockerbuild,
        };
        if !(variants.regular || variants.lowmem || variants.dockerbuild) {
            return Err(UsageError::NothingToBuild);
        }

        let (hostname, visibility) = match hostname {
            Some(hostname) if hostname != DEFAULT_HOSTNAME => (hostname, Visibility::Private),
            _ => (DEFAULT_HOSTNAME.to_owned(), Visibility::Public),
        };

        let config = BuildConfig {
            pe_version,
            tag_version,
            base_tag_version,
            hostname,
            visibility,
            root_passwd,
            r10k: (!no_r10k).then(|| R10kControl {
                url: r10k_control.unwrap_or_else(|| DEFAULT_R10K_CONTROL_URL.to_owned()),
            }),
            variants,
            cleanup: !no_cleanup,
            installer: if old_installer {
                Installer::Answers
            } else {
                Installer::PeConf
            },
            templates_dir,
            media_dir,
            namespace,
            push,
            boot_wait: Duration::from_secs(boot_wait),
            report,
        };

        // Every image name the run can produce must be valid before anything is started.
        config.base_image()?;
        for variant in Variant::ALL {
            config.image(variant, &config.tag_version)?;
            config.image(variant, config.parent_tag_version())?;
        }

        Ok(config)
    }

    /// Non-fatal remarks about the configuration.
    pub fn warnings(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.installer == Installer::PeConf {
            if let Ok(version) = semver::Version::parse(&self.pe_version) {
                if version < FIRST_PE_CONF_VERSION {
                    out.push(format!(
                        "PE {version} predates pe.conf, you probably want to pass --old-installer"
                    ));
                }
            }
        }
        if self.variants.regular && self.base_tag_version.is_some() {
            out.push(
                "--base-tag-version is ignored for images layered on a regular image built in this run"
                    .to_owned(),
            );
        }
        out
    }

    /// The hostname up to the first period.
    pub fn short_hostname(&self) -> &str {
        self.hostname
            .split_once('.')
            .map_or(self.hostname.as_str(), |(short, _)| short)
    }

    pub fn dns_alt_names(&self) -> Vec<String> {
        let mut names = vec!["puppet".to_owned()];
        for name in [self.short_hostname(), self.hostname.as_str()] {
            if !names.iter().any(|existing| existing == name) {
                names.push(name.to_owned());
            }
        }
        names
    }

    /// Name of the directory the product tarball unpacks to.
    pub fn pe_media(&self) -> String {
        format!("puppet-enterprise-{}-el-7-x86_64", self.pe_version)
    }

    pub fn pe_tarball(&self) -> PathBuf {
        self.media_dir.join(format!("{}.tar.gz", self.pe_media()))
    }

    /// Release counter used to reference images of variants that are not built in this run.
    pub fn parent_tag_version(&self) -> &str {
        self.base_tag_version
            .as_deref()
            .unwrap_or(self.tag_version.as_str())
    }

    pub fn flavor(&self, variant: Variant) -> Flavor {
        let flavor = Flavor::new(self.visibility).with_r10k(self.r10k.is_some());
        match variant {
            Variant::Regular => flavor,
            Variant::LowMem => flavor.with_lowmem(true),
            Variant::DockerBuild => flavor
                .with_lowmem(self.variants.lowmem)
                .with_dockerbuild(true),
        }
    }

    /// The variant whose image `variant` is layered on.
    pub fn parent(&self, variant: Variant) -> Option<Variant> {
        match variant {
            Variant::Regular => None,
            Variant::LowMem => Some(Variant::Regular),
            Variant::DockerBuild if self.variants.lowmem => Some(Variant::LowMem),
            Variant::DockerBuild => Some(Variant::Regular),
        }
    }

    /// The image the build recipe produces.
    pub fn base_image(&self) -> Result<ImageName, InvalidImageName> {
        ImageName::new(
            BASE_REPOSITORY,
            publish_tag(&self.pe_version, &self.tag_version),
        )
    }

    /// The published image of `variant` for release counter `tag_version`.
    pub fn image(&self, variant: Variant, tag_version: &str) -> Result<ImageName, InvalidImageName> {
        ImageName::new(
            self.flavor(variant).repository(),
            publish_tag(&self.pe_version, tag_version),
        )?
        .with_namespace(self.namespace.as_deref())
    }

    /// The container used while building `variant`. Named after the published repository so that
    /// at most one exists per image name.
    pub fn container_name(&self, variant: Variant) -> String {
        self.flavor(variant).repository()
    }
}
