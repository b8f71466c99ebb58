//! Local status display. The panel itself is a transport detail; the node
//! renders four text lines and hands them to whatever `StatusDisplay` is
//! wired in (the log, by default).

use tracing::info;

use crate::climate::RoofTarget;
use crate::mode::Mode;
use crate::sensor::Reading;

pub trait StatusDisplay: Send {
    fn show(&mut self, lines: &[String; 4]);
}

/// The four lines of the status panel.
pub fn lines(reading: Option<&Reading>, target: &RoofTarget, mode: Mode, link_up: bool) -> [String; 4] {
    let climate = match reading {
        Some(r) => format!("T {:.1}C  H {:.0}%", r.temperature, r.humidity),
        None => "T --  H --".to_string(),
    };
    let light = match reading {
        Some(r) => format!("Light {:.0}", r.light),
        None => "Light --".to_string(),
    };
    [
        climate,
        light,
        format!("Roof {} {}", target.label(), target.angle),
        format!("Mode {}  {}", mode, if link_up { "online" } else { "offline" }),
    ]
}

/// Writes the panel to the log whenever its content changes.
#[derive(Default)]
pub struct LogDisplay {
    last: Option<[String; 4]>,
}

impl StatusDisplay for LogDisplay {
    fn show(&mut self, lines: &[String; 4]) {
        if self.last.as_ref() == Some(lines) {
            return;
        }
        info!(target: "canopy_node::display", "{}", lines.join(" | "));
        self.last = Some(lines.clone());
    }
}

// ===========================================================================
// Tests
// ===========================================================================
