// Command lines for the external tools (rsync, fswatch, ssh)
//
// Pure builders: nothing here spawns a process.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::domain::service::{ServiceSpec, ToolPaths};

/// Slack added on top of the ssh connect timeout for one-shot ssh commands
const SSH_COMMAND_SLACK: Duration = Duration::from_secs(2);

/// rsync I/O timeout, as a multiple of the ssh connect timeout
const RSYNC_IO_TIMEOUT_FACTOR: u64 = 6;

/// A fully resolved process invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Always passed to the child, on top of the inherited allowlist
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<PathBuf>,
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_dir: None,
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Shell-like rendering for logs
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(quote_if_needed)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Single-quote `s` for a POSIX shell
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

fn is_shell_plain(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@,+%".contains(c))
}

fn quote_if_needed(s: &str) -> String {
    if is_shell_plain(s) {
        s.to_string()
    } else {
        shell_quote(s)
    }
}

/// `ssh` argv (program first) shared by probes, mkdir and rsync's `-e`
pub fn ssh_transport(spec: &ServiceSpec, tools: &ToolPaths) -> Vec<String> {
    let remote = &spec.remote;
    let mut argv = vec![
        tools.ssh.clone(),
        "-p".to_string(),
        remote.port.to_string(),
    ];
    if let Some(identity) = &remote.identity_file {
        argv.push("-i".to_string());
        argv.push(identity.display().to_string());
    }
    argv.extend([
        "-o".to_string(),
        "BatchMode=yes".to_string(),
        "-o".to_string(),
        format!("ConnectTimeout={}", spec.supervision.connect_timeout_secs),
    ]);
    for option in &remote.ssh_options {
        argv.push("-o".to_string());
        argv.push(option.clone());
    }
    argv
}

fn ssh_command_timeout(spec: &ServiceSpec) -> Duration {
    Duration::from_secs(spec.supervision.connect_timeout_secs) + SSH_COMMAND_SLACK
}

/// `ssh … target true` - succeeds iff the remote accepts a session
pub fn probe_command(spec: &ServiceSpec, tools: &ToolPaths) -> CommandSpec {
    let mut argv = ssh_transport(spec, tools).into_iter();
    let program = argv.next().unwrap_or_else(|| tools.ssh.clone());
    CommandSpec::new(program)
        .args(argv)
        .arg(spec.remote.target())
        .arg("true")
        .timeout(ssh_command_timeout(spec))
}

/// `ssh … target mkdir -p -- '<dest>'`
pub fn mkdir_command(spec: &ServiceSpec, tools: &ToolPaths) -> CommandSpec {
    let mut argv = ssh_transport(spec, tools).into_iter();
    let program = argv.next().unwrap_or_else(|| tools.ssh.clone());
    CommandSpec::new(program)
        .args(argv)
        .arg(spec.remote.target())
        .arg(format!("mkdir -p -- {}", shell_quote(&spec.destination)))
        .timeout(ssh_command_timeout(spec))
}

/// Full-tree rsync of `source/` into `target:destination/`
pub fn rsync_command(spec: &ServiceSpec, tools: &ToolPaths) -> CommandSpec {
    let io_timeout = spec.supervision.connect_timeout_secs * RSYNC_IO_TIMEOUT_FACTOR;
    let transport = ssh_transport(spec, tools)
        .iter()
        .map(|a| quote_if_needed(a))
        .collect::<Vec<_>>()
        .join(" ");

    let mut cmd = CommandSpec::new(tools.rsync.clone())
        .arg("-az")
        .arg(format!("--timeout={}", io_timeout));
    if spec.delete {
        cmd = cmd.arg("--delete");
    }
    cmd = cmd
        .args(spec.excludes.iter().map(|e| format!("--exclude={}", e)))
        .args(spec.rsync_args.iter().cloned());
    if !is_shell_plain(&spec.destination) {
        // Keep the remote shell from splitting or expanding the destination
        cmd = cmd.arg("--protect-args");
    }
    cmd = cmd
        .arg("-e")
        .arg(transport)
        .arg(with_trailing_slash(&spec.source.display().to_string()))
        .arg(format!(
            "{}:{}",
            spec.remote.target(),
            with_trailing_slash(&spec.destination)
        ));

    cmd.timeout(Duration::from_millis(spec.supervision.sync_timeout_ms))
}

/// `fswatch -r -o -E --latency <secs> [-e <regex>]… <source>`
///
/// `-o` prints one line per change batch, which is all the supervisor needs
/// to trigger a full-tree rsync.
pub fn watch_command(spec: &ServiceSpec, tools: &ToolPaths) -> CommandSpec {
    let latency_secs = spec.watch.latency_ms as f64 / 1000.0;
    let mut cmd = CommandSpec::new(tools.fswatch.clone())
        .arg("-r")
        .arg("-o")
        .arg("-E")
        .arg("--latency")
        .arg(format!("{}", latency_secs));
    let source = spec.source.display().to_string();
    for exclude in &spec.excludes {
        cmd = cmd.arg("-e").arg(exclude_to_regex(exclude, &source));
    }
    cmd.arg(source)
}

fn with_trailing_slash(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{}/", path)
    }
}

/// rsync-style exclude to the extended regex fswatch expects
///
/// fswatch matches against the full path while rsync matches whole path
/// components, so the pattern is wrapped in component boundaries. A leading
/// `/` anchors it at `root`, like rsync anchors it at the transfer root.
fn exclude_to_regex(pattern: &str, root: &str) -> String {
    let pattern = pattern.trim_end_matches('/');
    let (prefix, body) = match pattern.strip_prefix('/') {
        Some(rest) => (format!("^{}/", escape_regex(root.trim_end_matches('/'))), rest),
        None => ("(^|/)".to_string(), pattern),
    };

    let mut out = prefix;
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                out.push_str(".*");
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            _ => push_escaped(&mut out, c),
        }
    }
    out.push_str("(/|$)");
    out
}

fn escape_regex(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    s.chars().for_each(|c| push_escaped(&mut out, c));
    out
}

fn push_escaped(out: &mut String, c: char) {
    if ".+()|^$*?{}[]\\".contains(c) {
        out.push('\\');
    }
    out.push(c);
}
