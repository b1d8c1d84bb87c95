//! Channel levels and last-known state persistence.
//!
//! The fixture has no read-back: the persisted vector is the system's only
//! belief about physical channel levels. It is stepped exactly once per
//! issued command and checkpointed to disk on every step.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::LEVEL_MAX;

/// One of the four independently controllable light outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    White,
    Red,
    Green,
    Blue,
}

impl Channel {
    /// Fixed processing order: white, red, green, blue.
    pub const ORDER: [Channel; 4] = [
        Channel::White,
        Channel::Red,
        Channel::Green,
        Channel::Blue,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Channel::White => "white",
            Channel::Red => "red",
            Channel::Green => "green",
            Channel::Blue => "blue",
        }
    }
}

/// One-step adjustment direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

/// A 4-channel level vector, each channel in [0, LEVEL_MAX].
///
/// Value type: operations return new vectors. The single mutable instance
/// lives inside `StateStore`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Levels {
    pub white: u8,
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl Levels {
    pub fn new(white: u8, red: u8, green: u8, blue: u8) -> Self {
        Self {
            white: white.min(LEVEL_MAX),
            red: red.min(LEVEL_MAX),
            green: green.min(LEVEL_MAX),
            blue: blue.min(LEVEL_MAX),
        }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    pub fn get(self, channel: Channel) -> u8 {
        match channel {
            Channel::White => self.white,
            Channel::Red => self.red,
            Channel::Green => self.green,
            Channel::Blue => self.blue,
        }
    }

    pub fn with(self, channel: Channel, level: u8) -> Self {
        let level = level.min(LEVEL_MAX);
        let mut out = self;
        match channel {
            Channel::White => out.white = level,
            Channel::Red => out.red = level,
            Channel::Green => out.green = level,
            Channel::Blue => out.blue = level,
        }
        out
    }

    /// One command's effect: +/-1 on a single channel, clamped at the bounds.
    pub fn stepped(self, channel: Channel, direction: Direction) -> Self {
        let level = self.get(channel);
        let level = match direction {
            Direction::Up => (level + 1).min(LEVEL_MAX),
            Direction::Down => level.saturating_sub(1),
        };
        self.with(channel, level)
    }

    pub fn total(self) -> u32 {
        self.white as u32 + self.red as u32 + self.green as u32 + self.blue as u32
    }
}

impl std::fmt::Display for Levels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "W:{} R:{} G:{} B:{}",
            self.white, self.red, self.green, self.blue
        )
    }
}

/// Persisted last-known channel levels.
pub struct StateStore {
    path: PathBuf,
    current: Levels,
    fresh: bool,
}

impl StateStore {
    /// Load the persisted vector, seeding all-zero on a fresh install
    /// (the fixture ships dark). An unreadable or corrupt file also
    /// reseeds; `fresh()` reports either case so the caller can resync.
    pub fn open(path: &Path) -> io::Result<Self> {
        let loaded = fs::read_to_string(path)
            .ok()
            .filter(|content| content.len() <= 4096)
            .and_then(|content| serde_json::from_str::<Levels>(&content).ok());

        let mut store = Self {
            path: path.to_path_buf(),
            current: loaded.unwrap_or_else(Levels::zero),
            fresh: loaded.is_none(),
        };
        // Re-clamp in case the file was hand-edited out of range.
        store.current = Levels::new(
            store.current.white,
            store.current.red,
            store.current.green,
            store.current.blue,
        );
        if store.fresh {
            store.save()?;
        }
        Ok(store)
    }

    pub fn current(&self) -> Levels {
        self.current
    }

    pub fn fresh(&self) -> bool {
        self.fresh
    }

    /// Record one issued command's effect and checkpoint to disk.
    pub fn record_step(&mut self, channel: Channel, direction: Direction) -> io::Result<()> {
        self.current = self.current.stepped(channel, direction);
        self.fresh = false;
        self.save()
    }

    fn save(&self) -> io::Result<()> {
        let json = serde_json::to_string_pretty(&self.current)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        fs::write(&self.path, json)
    }
}

#[cfg(test)]
pub(crate) fn test_store_path(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("thalassa-test-{}-{}.json", tag, std::process::id()))
}
