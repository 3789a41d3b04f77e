//! In-memory transport for tests
//!
//! Simulates per-host directory trees and gluster volumes, records every
//! command it receives and can be told to fail, hang or refuse hosts.

use crate::domain::ports::{CommandOutput, CommandTransport, ProvisionerConfig};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Default)]
struct FakeState {
    dirs: BTreeMap<String, BTreeSet<PathBuf>>,
    volumes: BTreeMap<String, bool>,
    log: Vec<(String, String)>,
    failures: Vec<(String, String, String)>,
    unreachable: BTreeSet<String>,
    delays: BTreeMap<String, Duration>,
    late_replies: BTreeMap<(String, String), Duration>,
}

#[derive(Default)]
pub(crate) struct FakeTransport {
    state: Mutex<FakeState>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `command` on `host` exit 1 with `stderr`
    pub fn fail_on(&self, host: &str, command: &str, stderr: &str) {
        self.state
            .lock()
            .failures
            .push((host.into(), command.into(), stderr.into()));
    }

    pub fn unreachable(&self, host: &str) {
        self.state.lock().unreachable.insert(host.into());
    }

    pub fn delay(&self, host: &str, delay: Duration) {
        self.state.lock().delays.insert(host.into(), delay);
    }

    /// Apply `command` on `host` at once but hold the reply back for `delay`
    pub fn late_reply(&self, host: &str, command: &str, delay: Duration) {
        self.state
            .lock()
            .late_replies
            .insert((host.into(), command.into()), delay);
    }

    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    pub fn seed_dir(&self, host: &str, path: &str) {
        let mut state = self.state.lock();
        let dirs = state.dirs.entry(host.into()).or_default();
        for ancestor in Path::new(path).ancestors() {
            dirs.insert(ancestor.to_path_buf());
        }
    }

    pub fn seed_volume(&self, name: &str) {
        self.state.lock().volumes.insert(name.into(), true);
    }

    pub fn has_dir(&self, host: &str, path: &str) -> bool {
        self.state
            .lock()
            .dirs
            .get(host)
            .map(|dirs| dirs.contains(Path::new(path)))
            .unwrap_or(false)
    }

    pub fn has_volume(&self, name: &str) -> bool {
        self.state.lock().volumes.contains_key(name)
    }

    pub fn volume_started(&self, name: &str) -> bool {
        self.state.lock().volumes.get(name).copied().unwrap_or(false)
    }

    pub fn commands(&self) -> Vec<(String, String)> {
        self.state.lock().log.clone()
    }

    pub fn commands_for(&self, host: &str) -> Vec<String> {
        self.state
            .lock()
            .log
            .iter()
            .filter(|(h, _)| h == host)
            .map(|(_, c)| c.clone())
            .collect()
    }

    pub fn clear_log(&self) {
        self.state.lock().log.clear();
    }

    fn apply(&self, host: &str, command: &str) -> Result<CommandOutput> {
        let mut state = self.state.lock();
        state.log.push((host.into(), command.into()));

        if state.unreachable.contains(host) {
            return Err(Error::Transport(format!("host {} is unreachable", host)));
        }
        if let Some((_, _, stderr)) = state
            .failures
            .iter()
            .find(|(h, c, _)| h == host && c == command)
        {
            return Ok(CommandOutput::failure(1, stderr.clone()));
        }

        let words: Vec<&str> = command.split_whitespace().collect();
        let output = match words.as_slice() {
            ["mkdir", "-p", path] => {
                let dirs = state.dirs.entry(host.into()).or_default();
                for ancestor in Path::new(path).ancestors() {
                    dirs.insert(ancestor.to_path_buf());
                }
                CommandOutput::success()
            }
            ["mkdir", path] => {
                let dirs = state.dirs.entry(host.into()).or_default();
                let path = Path::new(path);
                if dirs.contains(path) {
                    CommandOutput::failure(
                        1,
                        format!("mkdir: cannot create directory '{}': File exists", path.display()),
                    )
                } else if !parent_exists(dirs, path) {
                    CommandOutput::failure(
                        1,
                        format!(
                            "mkdir: cannot create directory '{}': No such file or directory",
                            path.display()
                        ),
                    )
                } else {
                    dirs.insert(path.to_path_buf());
                    CommandOutput::success()
                }
            }
            ["rm", "-rf", path] => {
                if let Some(dirs) = state.dirs.get_mut(host) {
                    dirs.retain(|d| !d.starts_with(path));
                }
                CommandOutput::success()
            }
            ["rmdir", path] => {
                let dirs = state.dirs.entry(host.into()).or_default();
                let path = Path::new(path);
                if !dirs.contains(path) {
                    CommandOutput::failure(
                        1,
                        format!(
                            "rmdir: failed to remove '{}': No such file or directory",
                            path.display()
                        ),
                    )
                } else if dirs.iter().any(|d| d != path && d.starts_with(path)) {
                    CommandOutput::failure(
                        1,
                        format!("rmdir: failed to remove '{}': Directory not empty", path.display()),
                    )
                } else {
                    dirs.remove(path);
                    CommandOutput::success()
                }
            }
            ["gluster", "--mode=script", "volume", "create", name, rest @ ..] => {
                let name = name.to_string();
                if state.volumes.contains_key(&name) {
                    CommandOutput::failure(
                        1,
                        format!("volume create: {}: failed: Volume {} already exists", name, name),
                    )
                } else {
                    let missing = rest
                        .iter()
                        .filter_map(|w| w.split_once(':'))
                        .find(|(h, p)| {
                            !state
                                .dirs
                                .get(*h)
                                .map(|dirs| dirs.contains(Path::new(p)))
                                .unwrap_or(false)
                        })
                        .map(|(h, p)| format!("{}:{}", h, p));
                    match missing {
                        Some(brick) => CommandOutput::failure(
                            1,
                            format!("volume create: {}: failed: brick {} does not exist", name, brick),
                        ),
                        None => {
                            state.volumes.insert(name, false);
                            CommandOutput::success()
                        }
                    }
                }
            }
            ["gluster", "--mode=script", "volume", action, name, ..] => {
                let name = name.to_string();
                if !state.volumes.contains_key(&name) {
                    CommandOutput::failure(
                        1,
                        format!("volume {}: {}: failed: Volume {} does not exist", action, name, name),
                    )
                } else {
                    match *action {
                        "start" => {
                            state.volumes.insert(name, true);
                        }
                        "stop" if !state.volumes[&name] => {
                            return Ok(CommandOutput::failure(
                                1,
                                format!(
                                    "volume stop: {}: failed: Volume {} is not in the started state",
                                    name, name
                                ),
                            ));
                        }
                        "stop" => {
                            state.volumes.insert(name, false);
                        }
                        "delete" => {
                            state.volumes.remove(&name);
                        }
                        _ => {}
                    }
                    CommandOutput::success()
                }
            }
            _ => CommandOutput::failure(127, format!("{}: command not found", command)),
        };
        Ok(output)
    }
}

fn parent_exists(dirs: &BTreeSet<PathBuf>, path: &Path) -> bool {
    match path.parent() {
        None => true,
        Some(parent) if parent == Path::new("/") => true,
        Some(parent) => dirs.contains(parent),
    }
}

#[async_trait]
impl CommandTransport for FakeTransport {
    async fn run(&self, host: &str, command: &str, _config: &ProvisionerConfig) -> Result<CommandOutput> {
        let (delay, late) = {
            let state = self.state.lock();
            (
                state.delays.get(host).copied(),
                state
                    .late_replies
                    .get(&(host.to_string(), command.to_string()))
                    .copied(),
            )
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let output = self.apply(host, command);
        if let Some(late) = late {
            tokio::time::sleep(late).await;
        }
        output
    }

    fn name(&self) -> &str {
        "fake"
    }
}
