//! Names of the images published by `pe-build`.
//!
//! A published image is referenced as:
//!
//! ```txt
//! [<namespace>/]<repository>:<tag>
//! ```
//!
//! The repository is composed from a fixed prefix, the visibility of the image and the variant
//! markers, for example `pe_master_public_lowmem_r10k`. The tag is composed from the product version
//! and the release counter, for example `2018.1.0-3`.
//!
//! Validation follows the path-component and tag grammar of
//! [reference.go](https://github.com/distribution/distribution/blob/v2.7.1/reference/reference.go):
//!
//! ```txt
//! path-component := alpha-numeric [separator alpha-numeric]*
//! alpha-numeric  := /[a-z0-9]+/
//! separator      := /[_.]|__|[-]*/
//! tag            := /[\w][\w.-]{0,127}/
//! ```

use std::{fmt, str::FromStr, sync::LazyLock};

#[cfg(feature = "serde")]
use ::serde::{Deserialize, Deserializer, Serialize, Serializer};
use regex::Regex;

/// Every repository starts with this prefix.
pub const REPOSITORY_PREFIX: &str = "pe_master";

/// Repository of the image produced by the build recipe, before anything is installed.
pub const BASE_REPOSITORY: &str = "pe_master_base";

const NAMESPACE_SUFFIX: char = '/';
const TAG_PREFIX: char = ':';
const MARKER_SEPARATOR: char = '_';
const TAG_SEPARATOR: char = '-';

#[derive(Debug, PartialEq, Eq)]
pub struct InvalidImageName(String);

impl std::error::Error for InvalidImageName {}

impl fmt::Display for InvalidImageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid image name: {:?}", self.0)
    }
}

static PATH_COMPONENT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+(?:(?:[_.]|__|[-]*)[a-z0-9]+)*$").expect("path component regex")
});

static TAG_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\w][\w.-]{0,127}$").expect("tag regex"));

fn is_path_component(value: &str) -> bool {
    PATH_COMPONENT_REGEX.is_match(value)
}

fn is_tag(value: &str) -> bool {
    TAG_REGEX.is_match(value)
}

/// Whether the image was installed for the default placeholder hostname (public) or for a
/// hostname supplied by the operator (private).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Private,
}

impl Visibility {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The markers that make up a repository name. The markers are always written in the same order:
/// visibility, `lowmem`, `r10k`, `dockerbuild`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flavor {
    pub visibility: Visibility,
    pub lowmem: bool,
    pub r10k: bool,
    pub dockerbuild: bool,
}

impl Flavor {
    pub const fn new(visibility: Visibility) -> Self {
        Self {
            visibility,
            lowmem: false,
            r10k: false,
            dockerbuild: false,
        }
    }

    pub const fn with_lowmem(mut self, lowmem: bool) -> Self {
        self.lowmem = lowmem;
        self
    }

    pub const fn with_r10k(mut self, r10k: bool) -> Self {
        self.r10k = r10k;
        self
    }

    pub const fn with_dockerbuild(mut self, dockerbuild: bool) -> Self {
        self.dockerbuild = dockerbuild;
        self
    }

    pub fn repository(&self) -> String {
        let mut out = String::from(REPOSITORY_PREFIX);
        let markers = [
            Some(self.visibility.as_str()),
            self.lowmem.then_some("lowmem"),
            self.r10k.then_some("r10k"),
            self.dockerbuild.then_some("dockerbuild"),
        ];
        for marker in markers.into_iter().flatten() {
            out.push(MARKER_SEPARATOR);
            out.push_str(marker);
        }
        out
    }
}

/// Returns `<product_version>-<release>`.
pub fn publish_tag(product_version: &str, release: &str) -> String {
    let mut out = String::with_capacity(product_version.len() + 1 + release.len());
    out.push_str(product_version);
    out.push(TAG_SEPARATOR);
    out.push_str(release);
    out
}

/// A validated `[<namespace>/]<repository>:<tag>` reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageName {
    namespace: Option<String>,
    repository: String,
    tag: String,
}

impl ImageName {
    pub fn new(
        repository: impl Into<String>,
        tag: impl Into<String>,
    ) -> Result<Self, InvalidImageName> {
        let repository = repository.into();
        let tag = tag.into();
        if !is_path_component(&repository) || !is_tag(&tag) {
            return Err(InvalidImageName(format!("{repository}{TAG_PREFIX}{tag}")));
        }
        Ok(Self {
            namespace: None,
            repository,
            tag,
        })
    }

    pub fn with_namespace(mut self, namespace: Option<&str>) -> Result<Self, InvalidImageName> {
        match namespace {
            Some(namespace) if !is_path_component(namespace) => {
                Err(InvalidImageName(format!("{namespace}{NAMESPACE_SUFFIX}{self}")))
            }
            namespace => {
                self.namespace = namespace.map(str::to_owned);
                Ok(self)
            }
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }
}

impl fmt::Display for ImageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(namespace) = &self.namespace {
            write!(f, "{namespace}{NAMESPACE_SUFFIX}")?;
        }
        write!(f, "{}{TAG_PREFIX}{}", self.repository, self.tag)
    }
}

impl FromStr for ImageName {
    type Err = InvalidImageName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidImageName(s.to_owned());
        let (path, tag) = s.rsplit_once(TAG_PREFIX).ok_or_else(invalid)?;
        let (namespace, repository) = match path.split_once(NAMESPACE_SUFFIX) {
            Some((namespace, repository)) => (Some(namespace), repository),
            None => (None, path),
        };
        ImageName::new(repository, tag)
            .and_then(|name| name.with_namespace(namespace))
            .map_err(|_| invalid())
    }
}

#[cfg(feature = "serde")]
impl Serialize for ImageName {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> Deserialize<'de> for ImageName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value: String = Deserialize::deserialize(deserializer)?;
        value.parse().map_err(::serde::de::Error::custom)
    }
}
