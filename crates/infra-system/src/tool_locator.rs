// Locate external tools on PATH
use std::path::PathBuf;

use driftsync_core::domain::ToolPaths;

/// A tool that could not be found
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingTool {
    pub role: &'static str,
    pub program: String,
}

/// Resolve `program` the way a shell would
///
/// Names containing a `/` are taken as paths; bare names are searched in `PATH`.
pub fn find_program(program: &str) -> Option<PathBuf> {
    which::which(program).ok()
}

/// Check rsync and ssh (and fswatch when a service watches)
pub fn missing_tools(tools: &ToolPaths, needs_watcher: bool) -> Vec<MissingTool> {
    let mut wanted = vec![("rsync", &tools.rsync), ("ssh", &tools.ssh)];
    if needs_watcher {
        wanted.push(("fswatch", &tools.fswatch));
    }
    wanted
        .into_iter()
        .filter(|(_, program)| find_program(program).is_none())
        .map(|(role, program)| MissingTool {
            role,
            program: program.clone(),
        })
        .collect()
}
