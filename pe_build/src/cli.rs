use std::path::PathBuf;

use clap::{Args, CommandFactory, Parser};
use constcat::concat;
use log::info;

use crate::{
    config::{
        BuildConfig, UsageError, DEFAULT_BOOT_WAIT_SECS, DEFAULT_HOSTNAME, DEFAULT_MEDIA_DIR,
        DEFAULT_R10K_CONTROL_URL, DEFAULT_ROOT_PASSWD, DEFAULT_TEMPLATES_DIR,
    },
    engine::DockerCli,
    report, sequencer, Result,
};

const EXAMPLES: &str = "\
Examples:
  pe-build --pe-version 2018.1.0 --tag-version 3
      Build the regular, low-memory and dockerbuild images for PE 2018.1.0 and tag them 2018.1.0-3

  pe-build --pe-version 2018.1.0 --tag-version 4 --base-tag-version 3 --no-regular
      Build the low-memory and dockerbuild images on top of pe_master_public_r10k:2018.1.0-3

  pe-build --pe-version 2018.1.0 --tag-version 0 --hostname puppet.megacorp.com --no-r10k
      Build private images configured for puppet.megacorp.com without bootstrapping r10k";

#[derive(Debug, Parser)]
#[command(
    version = crate::version::VERSION,
    about = "Build Docker images with Puppet Enterprise installed, in regular, low-memory and dockerbuild variants.",
    after_help = EXAMPLES,
)]
pub struct Cli {
    #[command(flatten)]
    pub args: BuildArgs,
}

#[derive(Debug, Args)]
pub struct BuildArgs {
    /// Version of Puppet Enterprise to install, eg 2018.1.0. Delimited by periods.
    #[arg(long = "pe-version", value_name = "VERSION", allow_hyphen_values = true)]
    pub pe_version: Option<String>,

    /// Release counter the images are tagged with, eg 3.
    #[arg(long = "tag-version", value_name = "VERSION", allow_hyphen_values = true)]
    pub tag_version: Option<String>,

    /// Release counter of the images that variants not built in this run are layered on. Defaults to
    /// --tag-version.
    #[arg(long = "base-tag-version", value_name = "VERSION", allow_hyphen_values = true)]
    pub base_tag_version: Option<String>,

    #[arg(long = "hostname", value_name = "HOST", allow_hyphen_values = true, help = concat!("Hostname to install Puppet Enterprise for. Images built for a hostname other than ", DEFAULT_HOSTNAME, " are tagged private."))]
    pub hostname: Option<String>,

    /// Root password set in the images.
    #[arg(long = "root-passwd", value_name = "PASS", allow_hyphen_values = true, default_value = DEFAULT_ROOT_PASSWD)]
    pub root_passwd: String,

    #[arg(long = "r10k-control", value_name = "GIT_URL", num_args = 0..=1, default_missing_value = DEFAULT_R10K_CONTROL_URL, help = concat!("Bootstrap r10k from this control repository, which must provide a bootstrap.sh script. Defaults to ", DEFAULT_R10K_CONTROL_URL, "."))]
    pub r10k_control: Option<String>,

    /// Do not bootstrap r10k.
    #[arg(long = "no-r10k")]
    pub no_r10k: bool,

    /// Do not build the regular image.
    #[arg(long = "no-regular")]
    pub no_regular: bool,

    /// Do not build the low-memory image.
    #[arg(long = "no-lowmem")]
    pub no_lowmem: bool,

    /// Do not build the dockerbuild image.
    #[arg(long = "no-dockerbuild")]
    pub no_dockerbuild: bool,

    /// Keep the build containers around after committing them.
    #[arg(long = "no-cleanup")]
    pub no_cleanup: bool,

    /// Use the answers-file installer shipped with versions before 2016.2.
    #[arg(long = "old-installer")]
    pub old_installer: bool,

    /// Enable debug logging.
    #[arg(long = "debug")]
    pub debug: bool,

    /// Directory containing the Dockerfile, installer configuration and helper script templates.
    #[arg(long = "templates-dir", value_name = "DIR", allow_hyphen_values = true, default_value = DEFAULT_TEMPLATES_DIR)]
    pub templates_dir: PathBuf,

    /// Directory containing the puppet-enterprise-<VERSION>-el-7-x86_64.tar.gz tarball. Used as the
    /// build context.
    #[arg(long = "media-dir", value_name = "DIR", allow_hyphen_values = true, default_value = DEFAULT_MEDIA_DIR)]
    pub media_dir: PathBuf,

    /// Registry namespace to prefix the published images with, eg geoffwilliams.
    #[arg(long = "namespace", value_name = "NAME", allow_hyphen_values = true)]
    pub namespace: Option<String>,

    /// Push every image after committing it.
    #[arg(long = "push")]
    pub push: bool,

    /// Seconds to wait after starting a container before talking to it.
    #[arg(long = "boot-wait", value_name = "SECONDS", default_value_t = DEFAULT_BOOT_WAIT_SECS)]
    pub boot_wait: u64,

    /// Write a JSON summary of the published images to this file.
    #[arg(long = "report", value_name = "FILE", allow_hyphen_values = true)]
    pub report: Option<PathBuf>,
}

/// Splits `args` into the arguments the command line definition knows about and the ones it does
/// not. The first argument is the binary name and is always kept.
fn retain_known_args(
    command: &clap::Command,
    args: impl IntoIterator<Item = String>,
) -> (Vec<String>, Vec<String>) {
    let mut args = args.into_iter().peekable();
    let mut kept: Vec<String> = args.next().into_iter().collect();
    let mut ignored = Vec::new();

    while let Some(arg) = args.next() {
        let (known, inline_value) = if let Some(long) = arg.strip_prefix("--") {
            let (name, value) = match long.split_once('=') {
                Some((name, _)) => (name, true),
                None => (long, false),
            };
            let known = (!name.is_empty())
                .then(|| command.get_arguments().find(|a| a.get_long() == Some(name)))
                .flatten();
            (known, value)
        } else if let Some(short) = arg.strip_prefix('-') {
            let mut chars = short.chars();
            let known = match (chars.next(), chars.next()) {
                (Some(c), None) => command.get_arguments().find(|a| a.get_short() == Some(c)),
                _ => None,
            };
            (known, false)
        } else {
            (None, false)
        };

        let Some(known) = known else {
            ignored.push(arg);
            continue;
        };
        kept.push(arg);

        if inline_value || !known.get_action().takes_values() {
            continue;
        }
        let value_required = known
            .get_num_args()
            .map_or(true, |range| range.min_values() > 0);
        if let Some(next) = args.next_if(|next| value_required || !next.starts_with('-')) {
            kept.push(next);
        }
    }

    (kept, ignored)
}

impl Cli {
    /// Parses the command line, silently dropping unknown arguments. The dropped arguments are
    /// returned so that they can be reported once logging is set up.
    pub fn try_parse_lenient<I>(args: I) -> Result<(Self, Vec<String>), clap::Error>
    where
        I: IntoIterator<Item = String>,
    {
        let mut command = Self::command();
        command.build();
        let (kept, ignored) = retain_known_args(&command, args);
        let cli = Self::try_parse_from(kept)?;
        Ok((cli, ignored))
    }

    pub fn debug(&self) -> bool {
        self.args.debug
    }

    /// The full help text.
    pub fn usage() -> String {
        Self::command().render_help().to_string()
    }

    pub fn resolve(self) -> Result<BuildConfig, UsageError> {
        BuildConfig::resolve(self.args)
    }
}

/// The process exit code for a command line that could not be turned into a run. Only a version
/// request counts as success.
pub fn exit_code(error: &clap::Error) -> i32 {
    match error.kind() {
        clap::error::ErrorKind::DisplayVersion => 0,
        _ => 1,
    }
}

/// Builds every enabled variant and writes the report, if requested.
pub fn run(config: &BuildConfig) -> Result<()> {
    let engine = DockerCli::default();
    let published = sequencer::run(config, &engine)?;

    for image in &published {
        info!("published {variant} image {name}", variant = image.variant, name = image.image);
    }

    if let Some(path) = config.report.as_deref() {
        report::write(path, config, &published)?;
        info!("wrote report to {path:?}");
    }

    Ok(())
}
