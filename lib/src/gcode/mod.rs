//! G-code reading module.
//!
//! This module turns a sliced print job into the per-layer point clouds the
//! planner optimizes against. Only the motion subset of G-code matters here:
//! moves, positioning modes, extrusion modes and position resets.

mod parser;

pub use parser::{load_point_cloud, parse_layers, LayerExtractor};

use crate::{Error, Result};

/// The motion-related G-code commands the extractor understands.
#[derive(Clone, Debug, PartialEq)]
pub enum GCodeCommand {
    /// G0 - Rapid move (travel)
    RapidMove {
        x: Option<f64>,
        y: Option<f64>,
        z: Option<f64>,
        f: Option<f64>,
    },
    /// G1 - Linear move (extrusion)
    LinearMove {
        x: Option<f64>,
        y: Option<f64>,
        z: Option<f64>,
        e: Option<f64>,
        f: Option<f64>,
    },
    /// G28 - Home
    Home { x: bool, y: bool, z: bool },
    /// G90 - Absolute positioning
    AbsolutePositioning,
    /// G91 - Relative positioning
    RelativePositioning,
    /// G92 - Set position
    SetPosition {
        x: Option<f64>,
        y: Option<f64>,
        z: Option<f64>,
        e: Option<f64>,
    },
    /// M82 - Absolute extrusion
    AbsoluteExtrusion,
    /// M83 - Relative extrusion
    RelativeExtrusion,
    /// Comment
    Comment(String),
    /// Anything else, kept verbatim
    Raw(String),
}

/// Parameter words of a single command, e.g. `X10.5`.
#[derive(Default)]
struct Words {
    x: Option<f64>,
    y: Option<f64>,
    z: Option<f64>,
    e: Option<f64>,
    f: Option<f64>,
    flags: Vec<char>,
}

impl Words {
    fn parse<'a>(tokens: impl Iterator<Item = &'a str>) -> Result<Self> {
        let mut words = Words::default();
        for token in tokens {
            let mut chars = token.chars();
            let Some(letter) = chars.next() else {
                continue;
            };
            let letter = letter.to_ascii_uppercase();
            let rest = chars.as_str();
            if rest.is_empty() {
                words.flags.push(letter);
                continue;
            }
            let slot = match letter {
                'X' => &mut words.x,
                'Y' => &mut words.y,
                'Z' => &mut words.z,
                'E' => &mut words.e,
                'F' => &mut words.f,
                _ => continue,
            };
            let value: f64 = rest
                .parse()
                .map_err(|_| Error::GCode(format!("invalid number in word '{}'", token)))?;
            *slot = Some(value);
        }
        Ok(words)
    }
}

impl GCodeCommand {
    /// Parse a single line of G-code.
    ///
    /// Returns `Ok(None)` for blank lines. Trailing `;` comments on command
    /// lines are dropped.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        if let Some(comment) = line.strip_prefix(';') {
            return Ok(Some(GCodeCommand::Comment(comment.trim().to_string())));
        }

        let code = line.split(';').next().unwrap_or_default().trim();
        let mut tokens = code.split_whitespace();
        let Some(head) = tokens.next() else {
            return Ok(None);
        };

        let cmd = match head.to_ascii_uppercase().as_str() {
            // A G0 carrying E extrudes like a G1.
            "G0" | "G00" => {
                let w = Words::parse(tokens)?;
                if w.e.is_some() {
                    GCodeCommand::LinearMove {
                        x: w.x,
                        y: w.y,
                        z: w.z,
                        e: w.e,
                        f: w.f,
                    }
                } else {
                    GCodeCommand::RapidMove {
                        x: w.x,
                        y: w.y,
                        z: w.z,
                        f: w.f,
                    }
                }
            }
            "G1" | "G01" => {
                let w = Words::parse(tokens)?;
                GCodeCommand::LinearMove {
                    x: w.x,
                    y: w.y,
                    z: w.z,
                    e: w.e,
                    f: w.f,
                }
            }
            "G28" => {
                // Axis words select axes whether bare or valued (`G28 X0`).
                let w = Words::parse(tokens)?;
                let x = w.x.is_some() || w.flags.contains(&'X');
                let y = w.y.is_some() || w.flags.contains(&'Y');
                let z = w.z.is_some() || w.flags.contains(&'Z');
                let all = !(x || y || z);
                GCodeCommand::Home {
                    x: all || x,
                    y: all || y,
                    z: all || z,
                }
            }
            "G90" => GCodeCommand::AbsolutePositioning,
            "G91" => GCodeCommand::RelativePositioning,
            "G92" => {
                let w = Words::parse(tokens)?;
                GCodeCommand::SetPosition {
                    x: w.x,
                    y: w.y,
                    z: w.z,
                    e: w.e,
                }
            }
            "M82" => GCodeCommand::AbsoluteExtrusion,
            "M83" => GCodeCommand::RelativeExtrusion,
            _ => GCodeCommand::Raw(line.to_string()),
        };
        Ok(Some(cmd))
    }

    /// Render the command back as a single G-code line.
    pub fn to_gcode(&self) -> String {
        match self {
            GCodeCommand::RapidMove { x, y, z, f } => {
                let mut cmd = String::from("G0");
                push_word(&mut cmd, 'X', *x, 3);
                push_word(&mut cmd, 'Y', *y, 3);
                push_word(&mut cmd, 'Z', *z, 3);
                push_word(&mut cmd, 'F', *f, 0);
                cmd
            }
            GCodeCommand::LinearMove { x, y, z, e, f } => {
                let mut cmd = String::from("G1");
                push_word(&mut cmd, 'X', *x, 3);
                push_word(&mut cmd, 'Y', *y, 3);
                push_word(&mut cmd, 'Z', *z, 3);
                push_word(&mut cmd, 'E', *e, 5);
                push_word(&mut cmd, 'F', *f, 0);
                cmd
            }
            GCodeCommand::Home { x, y, z } => {
                let mut cmd = String::from("G28");
                if *x {
                    cmd.push_str(" X");
                }
                if *y {
                    cmd.push_str(" Y");
                }
                if *z {
                    cmd.push_str(" Z");
                }
                cmd
            }
            GCodeCommand::AbsolutePositioning => "G90".to_string(),
            GCodeCommand::RelativePositioning => "G91".to_string(),
            GCodeCommand::SetPosition { x, y, z, e } => {
                let mut cmd = String::from("G92");
                push_word(&mut cmd, 'X', *x, 3);
                push_word(&mut cmd, 'Y', *y, 3);
                push_word(&mut cmd, 'Z', *z, 3);
                push_word(&mut cmd, 'E', *e, 5);
                cmd
            }
            GCodeCommand::AbsoluteExtrusion => "M82".to_string(),
            GCodeCommand::RelativeExtrusion => "M83".to_string(),
            GCodeCommand::Comment(text) => format!("; {}", text),
            GCodeCommand::Raw(line) => line.clone(),
        }
    }
}

fn push_word(cmd: &mut String, letter: char, value: Option<f64>, precision: usize) {
    if let Some(v) = value {
        cmd.push_str(&format!(" {}{:.*}", letter, precision, v));
    }
}
