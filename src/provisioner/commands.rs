//! Remote command shapes
//!
//! Every command sent to a storage host is built here.

use crate::domain::ports::BrickTarget;
use std::path::Path;

const GLUSTER: &str = "gluster --mode=script";

/// Quote a shell word unless it is made only of safe characters
pub fn quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | ':' | '=' | '@' | '+' | ','));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

fn path_word(path: &Path) -> String {
    quote(&path.to_string_lossy())
}

/// `mkdir -p <parentDir>`
pub fn make_parent_dir(target: &BrickTarget) -> String {
    format!("mkdir -p {}", path_word(&target.parent_dir))
}

/// `mkdir <brickDir>`; fails when the brick already exists
pub fn make_brick_dir(target: &BrickTarget) -> String {
    format!("mkdir {}", path_word(&target.brick_dir))
}

/// `rm -rf <brickDir>`; succeeds when the brick is already gone
pub fn remove_brick_dir(target: &BrickTarget) -> String {
    format!("rm -rf {}", path_word(&target.brick_dir))
}

/// `rmdir <brickDir>`; leaves a brick that holds data
pub fn remove_empty_brick_dir(target: &BrickTarget) -> String {
    format!("rmdir {}", path_word(&target.brick_dir))
}

/// `rmdir <parentDir>`; only removes an empty directory
pub fn remove_parent_dir(target: &BrickTarget) -> String {
    format!("rmdir {}", path_word(&target.parent_dir))
}

/// `gluster volume create <name> [<type>] <bricks...> force`
pub fn volume_create(name: &str, volume_type: &str, bricks: &[BrickTarget]) -> String {
    let mut words = vec![GLUSTER.to_string(), "volume create".into(), quote(name)];
    words.extend(volume_type.split_whitespace().map(quote));
    words.extend(bricks.iter().map(|b| quote(&b.brick_spec())));
    words.push("force".into());
    words.join(" ")
}

pub fn volume_start(name: &str) -> String {
    format!("{} volume start {}", GLUSTER, quote(name))
}

pub fn volume_stop(name: &str) -> String {
    format!("{} volume stop {} force", GLUSTER, quote(name))
}

pub fn volume_delete(name: &str) -> String {
    format!("{} volume delete {}", GLUSTER, quote(name))
}
