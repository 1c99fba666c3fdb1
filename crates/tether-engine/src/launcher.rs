//! Starting and stopping the simulator process.
//!
//! The client creates the loading semaphore before spawning, then waits
//! for the simulator to post it once its engine has booted. No region is
//! touched before that signal.

use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;

use parking_lot::Mutex;
use tether_shm::cleanup::{self, CleanupGuard};
use tracing::{debug, info, warn};

use crate::config::{EnvironmentConfig, LaunchConfig};
use crate::error::LaunchError;

/// Interval at which the boot wait checks whether the child died.
#[cfg(unix)]
const BOOT_POLL: std::time::Duration = std::time::Duration::from_millis(100);

/// Arguments passed to the simulator binary, excluding the binary.
pub fn command_line(env: &EnvironmentConfig, launch: &LaunchConfig, world: &str) -> Vec<String> {
    let mut args = vec![
        world.to_string(),
        "-HolodeckOn".to_string(),
        format!("-opengl{}", launch.gl_version),
        format!("-LOG={}", launch.log_file),
        "-ForceRes".to_string(),
        format!("-ResX={}", env.window_width),
        format!("-ResY={}", env.window_height),
        format!("--HolodeckUUID={}", env.uuid),
        format!("-TicksPerSec={}", env.ticks_per_sec),
        format!("-FramesPerSec={}", env.frames_per_sec()),
    ];
    for (axis, v) in ["X", "Y", "Z"].iter().zip(launch.env_min) {
        args.push(format!("-EnvMin{axis}={v}"));
    }
    for (axis, v) in ["X", "Y", "Z"].iter().zip(launch.env_max) {
        args.push(format!("-EnvMax{axis}={v}"));
    }
    args.push(format!("-OctreeMin={}", launch.octree_min));
    args.push(format!("-OctreeMax={}", launch.octree_max));
    args
}

/// A simulator child process. Killed and reaped on drop.
pub struct SimulatorProcess {
    child: Arc<Mutex<Child>>,
    pid: u32,
    exited: Option<ExitStatus>,
    _kill_on_exit: CleanupGuard,
}

impl SimulatorProcess {
    /// Spawn the simulator for `world` and wait for it to boot.
    #[cfg(unix)]
    pub fn launch(
        env: &EnvironmentConfig,
        launch: &LaunchConfig,
        world: &str,
    ) -> Result<Self, LaunchError> {
        use crate::handshake::loading_semaphore;
        use crate::semaphore::NamedSemaphore;

        if !launch.binary_path.exists() {
            return Err(LaunchError::MissingBinary {
                path: launch.binary_path.clone(),
            });
        }
        let name = loading_semaphore(&env.uuid);
        let loading = NamedSemaphore::create_exclusive(&name).map_err(|source| {
            LaunchError::Semaphore {
                name: name.clone(),
                source,
            }
        })?;

        let result = Self::spawn(env, launch, world).and_then(|mut process| {
            let deadline = std::time::Instant::now() + env.timeouts.boot;
            let loaded = loading
                .wait_until(deadline, BOOT_POLL, || process.poll_exit().is_some())
                .map_err(|source| LaunchError::Semaphore {
                    name: name.clone(),
                    source,
                })?;
            if loaded {
                info!(pid = process.pid, world, "simulator booted");
                return Ok(process);
            }
            match process.poll_exit() {
                Some(status) => Err(LaunchError::ExitedDuringBoot { status }),
                None => {
                    process.kill();
                    Err(LaunchError::BootTimeout {
                        timeout: env.timeouts.boot,
                    })
                }
            }
        });
        drop(loading);
        if let Err(e) = NamedSemaphore::unlink(&name) {
            warn!(semaphore = %name, error = %e, "could not unlink loading semaphore");
        }
        result
    }

    /// Launching needs POSIX named semaphores.
    #[cfg(not(unix))]
    pub fn launch(
        _env: &EnvironmentConfig,
        _launch: &LaunchConfig,
        _world: &str,
    ) -> Result<Self, LaunchError> {
        Err(LaunchError::Unsupported)
    }

    #[cfg_attr(not(unix), allow(dead_code))]
    fn spawn(env: &EnvironmentConfig, launch: &LaunchConfig, world: &str) -> Result<Self, LaunchError> {
        let mut cmd = Command::new(&launch.binary_path);
        cmd.args(command_line(env, launch, world));
        if !env.show_viewport {
            cmd.env_remove("DISPLAY");
        }
        for var in &launch.remove_env {
            cmd.env_remove(var);
        }
        if !launch.verbose {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }
        let child = cmd.spawn().map_err(|source| LaunchError::Spawn {
            path: launch.binary_path.clone(),
            source,
        })?;
        let pid = child.id();
        info!(pid, binary = %launch.binary_path.display(), world, uuid = %env.uuid, "launched simulator");

        let child = Arc::new(Mutex::new(child));
        let on_exit = Arc::clone(&child);
        let guard = cleanup::register(format!("simulator pid {pid}"), move || {
            if let Some(mut c) = on_exit.try_lock() {
                let _ = c.kill();
                let _ = c.wait();
            }
        });
        Ok(Self {
            child,
            pid,
            exited: None,
            _kill_on_exit: guard,
        })
    }

    /// OS process id.
    pub fn id(&self) -> u32 {
        self.pid
    }

    /// The exit status, if the process has exited.
    pub fn poll_exit(&mut self) -> Option<ExitStatus> {
        if self.exited.is_none() {
            self.exited = self.child.lock().try_wait().ok().flatten();
        }
        self.exited
    }

    /// Kill and reap the process. Safe to call repeatedly.
    pub fn kill(&mut self) {
        if self.exited.is_some() {
            return;
        }
        let mut child = self.child.lock();
        if let Err(e) = child.kill() {
            debug!(pid = self.pid, error = %e, "kill failed, process likely gone");
        }
        match child.wait() {
            Ok(status) => {
                info!(pid = self.pid, %status, "simulator stopped");
                self.exited = Some(status);
            }
            Err(e) => warn!(pid = self.pid, error = %e, "could not reap simulator"),
        }
    }
}

impl Drop for SimulatorProcess {
    fn drop(&mut self) {
        self.kill();
    }
}

impl std::fmt::Debug for SimulatorProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatorProcess")
            .field("pid", &self.pid)
            .field("exited", &self.exited)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arguments_follow_launch_contract() {
        let env = EnvironmentConfig {
            uuid: "1234".into(),
            ticks_per_sec: 60,
            window_width: 640,
            window_height: 480,
            ..EnvironmentConfig::default()
        };
        let launch = LaunchConfig::new("/opt/sim/Holodeck");
        let args = command_line(&env, &launch, "PierHarbor");
        assert_eq!(
            args,
            vec![
                "PierHarbor",
                "-HolodeckOn",
                "-opengl4",
                "-LOG=HolodeckLog.txt",
                "-ForceRes",
                "-ResX=640",
                "-ResY=480",
                "--HolodeckUUID=1234",
                "-TicksPerSec=60",
                "-FramesPerSec=60",
                "-EnvMinX=-10",
                "-EnvMinY=-10",
                "-EnvMinZ=-10",
                "-EnvMaxX=10",
                "-EnvMaxY=10",
                "-EnvMaxZ=10",
                "-OctreeMin=0.02",
                "-OctreeMax=5",
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn missing_binary_fails_before_any_semaphore() {
        let env = EnvironmentConfig::default();
        let launch = LaunchConfig::new("/nonexistent/simulator");
        match SimulatorProcess::launch(&env, &launch, "World") {
            Err(LaunchError::MissingBinary { path }) => {
                assert_eq!(path, std::path::PathBuf::from("/nonexistent/simulator"));
            }
            other => panic!("expected MissingBinary, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn process_exiting_during_boot_is_reported() {
        let mut env = EnvironmentConfig::default();
        env.timeouts.boot = std::time::Duration::from_secs(5);
        let launch = LaunchConfig::new("/bin/true");
        if !launch.binary_path.exists() {
            return;
        }
        match SimulatorProcess::launch(&env, &launch, "World") {
            Err(LaunchError::ExitedDuringBoot { status }) => assert!(status.success()),
            other => panic!("expected ExitedDuringBoot, got {other:?}"),
        }
        // The loading semaphore is gone.
        let name = crate::handshake::loading_semaphore(&env.uuid);
        assert!(crate::semaphore::NamedSemaphore::open(&name).is_err());
    }
}
