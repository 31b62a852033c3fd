use crate::config::{PlayerConfig, PlayerKind};
use crate::error::{EResult, Error};
use bmart_derive::EnumStr;
use log::{debug, info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

/// Media playback capability
///
/// Calls return quickly, the clip itself plays out-of-band.
pub trait Player: Send {
    /// Starts the clip, superseding the current one
    fn play(&mut self, path: &Path) -> EResult<()>;
    fn stop(&mut self) -> EResult<()>;
}

pub fn create(config: &PlayerConfig, dry_run: bool) -> Box<dyn Player> {
    if dry_run || config.kind == PlayerKind::Log {
        info!("player: log only");
        Box::new(LogPlayer::default())
    } else {
        info!("player: {} {}", config.command, config.args.join(" "));
        Box::new(CommandPlayer::new(
            &config.command,
            &config.args,
            config.overlap,
        ))
    }
}

struct Clip {
    child: Child,
    path: PathBuf,
}

/// Runs an external player process per clip
///
/// The next clip is started before the previous process is stopped, so the
/// screen is never left blank between clips.
pub struct CommandPlayer {
    command: String,
    args: Vec<String>,
    overlap: Duration,
    current: Option<Clip>,
}

impl CommandPlayer {
    pub fn new(command: &str, args: &[String], overlap: Duration) -> Self {
        Self {
            command: command.to_owned(),
            args: args.to_vec(),
            overlap,
            current: None,
        }
    }
    pub fn current_pid(&self) -> Option<u32> {
        self.current.as_ref().map(|c| c.child.id())
    }
    pub fn current_path(&self) -> Option<&Path> {
        self.current.as_ref().map(|c| c.path.as_path())
    }
}

fn stop_clip(mut clip: Clip) -> EResult<()> {
    match clip.child.try_wait() {
        Ok(Some(status)) => {
            debug!("{} finished ({})", clip.path.display(), status);
            return Ok(());
        }
        Ok(None) => {}
        Err(e) => warn!("{}: {}", clip.path.display(), e),
    }
    clip.child
        .kill()
        .and_then(|()| clip.child.wait())
        .map(|_| debug!("{} stopped", clip.path.display()))
        .map_err(|e| Error::playback(format!("unable to stop {}: {}", clip.path.display(), e)))
}

impl Player for CommandPlayer {
    fn play(&mut self, path: &Path) -> EResult<()> {
        if !path.exists() {
            return Err(Error::playback(format!(
                "video not found: {}",
                path.display()
            )));
        }
        let child = Command::new(&self.command)
            .args(&self.args)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::playback(format!("unable to start {}: {}", self.command, e)))?;
        debug!("{} started, pid {}", path.display(), child.id());
        let previous = self.current.replace(Clip {
            child,
            path: path.to_owned(),
        });
        if let Some(previous) = previous {
            if !self.overlap.is_zero() {
                thread::sleep(self.overlap);
            }
            stop_clip(previous)?;
        }
        Ok(())
    }
    fn stop(&mut self) -> EResult<()> {
        if let Some(clip) = self.current.take() {
            stop_clip(clip)?;
        }
        Ok(())
    }
}

impl Drop for CommandPlayer {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("{}", e);
        }
    }
}

/// Dry-run player
#[derive(Default)]
pub struct LogPlayer {
    current: Option<PathBuf>,
}

impl Player for LogPlayer {
    fn play(&mut self, path: &Path) -> EResult<()> {
        info!("play {}", path.display());
        self.current.replace(path.to_owned());
        Ok(())
    }
    fn stop(&mut self) -> EResult<()> {
        if let Some(path) = self.current.take() {
            info!("stop {}", path.display());
        }
        Ok(())
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, EnumStr)]
#[enumstr(rename_all = "lowercase")]
pub enum VideoStatus {
    Ok,
    Missing,
    Unreadable,
}

pub fn check_video(path: &Path) -> VideoStatus {
    if !path.exists() {
        VideoStatus::Missing
    } else if fs::File::open(path).is_err() {
        VideoStatus::Unreadable
    } else {
        VideoStatus::Ok
    }
}

/// Start-up check, warns about every video which can not be played
pub fn check_videos<'a, I>(videos: I) -> usize
where
    I: IntoIterator<Item = (&'a str, &'a Path)>,
{
    let mut failed = 0;
    for (name, path) in videos {
        match check_video(path) {
            VideoStatus::Ok => debug!("video {} -> {}", name, path.display()),
            status => {
                warn!("video {} {}: {}", name, status, path.display());
                failed += 1;
            }
        }
    }
    failed
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_check_video() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Warning.mp4");
        assert_eq!(check_video(&path), VideoStatus::Missing);
        fs::write(&path, b"").unwrap();
        assert_eq!(check_video(&path), VideoStatus::Ok);
        let missing = dir.path().join("Guide_steps.mp4");
        assert_eq!(
            check_videos([("Warning", path.as_path()), ("Guide_steps", missing.as_path())]),
            1
        );
    }

    #[test]
    fn test_log_player() {
        let mut player = LogPlayer::default();
        player.play(Path::new("a.mp4")).unwrap();
        assert_eq!(player.current.as_deref(), Some(Path::new("a.mp4")));
        player.stop().unwrap();
        assert!(player.current.is_none());
    }

    #[cfg(unix)]
    fn sleeper() -> CommandPlayer {
        // the clip path becomes $0 of the shell script
        CommandPlayer::new(
            "sh",
            &["-c".to_owned(), "sleep 5".to_owned()],
            Duration::from_millis(10),
        )
    }

    #[cfg(unix)]
    #[test]
    fn test_command_player_hand_over() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.mp4");
        let b = dir.path().join("b.mp4");
        fs::write(&a, b"").unwrap();
        fs::write(&b, b"").unwrap();
        let mut player = sleeper();
        player.play(&a).unwrap();
        let first = player.current_pid().unwrap();
        player.play(&b).unwrap();
        assert_ne!(player.current_pid(), Some(first));
        assert_eq!(player.current_path(), Some(b.as_path()));
        player.stop().unwrap();
        assert!(player.current_pid().is_none());
        // idempotent
        player.stop().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_command_player_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mut player = sleeper();
        let err = player.play(&dir.path().join("none.mp4")).unwrap_err();
        assert!(matches!(err, Error::Playback(_)));
        let a = dir.path().join("a.mp4");
        fs::write(&a, b"").unwrap();
        let mut player = CommandPlayer::new("/nonexistent/player", &[], Duration::ZERO);
        let err = player.play(&a).unwrap_err();
        assert!(matches!(err, Error::Playback(_)));
        assert!(player.current_pid().is_none());
    }
}
