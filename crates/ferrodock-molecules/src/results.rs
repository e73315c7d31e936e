//! Parsing docking engine output into ranked poses.
//!
//! Two sources are understood: the results table printed on stdout and the
//! multi-model output structure file. Stdout numbering is authoritative when
//! both are available; the structure file contributes per-pose coordinates.

use crate::error::Result;
use regex::Regex;
use serde::Serialize;
use std::path::Path;
use tracing::{debug, warn};

/// One ranked binding pose.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DockedPose {
    /// 1-based, 1 = best.
    pub pose_number: u32,
    /// kcal/mol, more negative binds stronger.
    pub affinity: f64,
    pub rmsd_lb: f64,
    pub rmsd_ub: f64,
    /// Model text wrapped in `MODEL`/`ENDMDL`.
    pub structure: Option<String>,
}

/// Aggregate view of a pose list; every field is `None` when empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PoseSummary {
    pub count: usize,
    pub best: Option<f64>,
    pub worst: Option<f64>,
    pub mean: Option<f64>,
    pub range: Option<f64>,
}

fn row_regex() -> &'static Regex {
    use std::sync::OnceLock;
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // "   1       -8.5      0.000      0.000"
        Regex::new(r"^\s*(\d+)\s+(-?\d+(?:\.\d+)?)\s+(-?\d+(?:\.\d+)?)\s+(-?\d+(?:\.\d+)?)\s*$")
            .expect("static regex")
    })
}

fn remark_regex() -> &'static Regex {
    use std::sync::OnceLock;
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // "REMARK VINA RESULT:    -8.5      0.000      0.000"
        Regex::new(r"^REMARK\s+\S+\s+RESULT:\s+(-?\d+(?:\.\d+)?)\s+(-?\d+(?:\.\d+)?)\s+(-?\d+(?:\.\d+)?)")
            .expect("static regex")
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum TableState {
    Header,
    Separator,
    Rows,
}

/// Parse the results table printed by the engine.
pub fn parse_console_output(text: &str) -> Vec<DockedPose> {
    let mut state = TableState::Header;
    let mut poses = Vec::new();

    for line in text.lines() {
        match state {
            TableState::Header => {
                let lower = line.to_ascii_lowercase();
                if lower.contains("mode") && lower.contains("affinity") {
                    state = TableState::Separator;
                }
            }
            TableState::Separator => {
                if line.trim_start().starts_with("---") {
                    state = TableState::Rows;
                }
            }
            TableState::Rows => {
                let trimmed = line.trim();
                if trimmed.is_empty() || trimmed.starts_with("Writing") {
                    continue;
                }
                let Some(caps) = row_regex().captures(line) else { break };
                let (Ok(pose_number), Ok(affinity), Ok(rmsd_lb), Ok(rmsd_ub)) = (
                    caps[1].parse::<u32>(),
                    caps[2].parse::<f64>(),
                    caps[3].parse::<f64>(),
                    caps[4].parse::<f64>(),
                ) else {
                    break;
                };
                poses.push(DockedPose {
                    pose_number,
                    affinity,
                    rmsd_lb,
                    rmsd_ub,
                    structure: None,
                });
            }
        }
    }
    debug!(poses = poses.len(), "Parsed console results");
    poses
}

/// Parse a multi-model output structure from text.
///
/// A file without `MODEL` records is treated as model 1. Models without a
/// result remark are skipped.
pub fn parse_structure_text(text: &str) -> Vec<DockedPose> {
    let has_models = text.lines().any(|l| l.starts_with("MODEL"));
    let mut models: Vec<(u32, Vec<&str>)> = Vec::new();

    if has_models {
        let mut current: Option<(u32, Vec<&str>)> = None;
        for line in text.lines() {
            if let Some(rest) = line.strip_prefix("MODEL") {
                if let Some(done) = current.take() {
                    models.push(done);
                }
                let number = rest.trim().parse().unwrap_or(models.len() as u32 + 1);
                current = Some((number, Vec::new()));
            } else if line.starts_with("ENDMDL") {
                if let Some(done) = current.take() {
                    models.push(done);
                }
            } else if let Some((_, body)) = current.as_mut() {
                body.push(line);
            }
        }
        if let Some(done) = current {
            models.push(done);
        }
    } else {
        models.push((1, text.lines().collect()));
    }

    models
        .into_iter()
        .filter_map(|(number, body)| {
            let caps = body.iter().find_map(|line| remark_regex().captures(line))?;
            let mut structure = format!("MODEL {number}\n");
            for line in &body {
                structure.push_str(line);
                structure.push('\n');
            }
            structure.push_str("ENDMDL\n");
            Some(DockedPose {
                pose_number: number,
                affinity: caps[1].parse().ok()?,
                rmsd_lb: caps[2].parse().ok()?,
                rmsd_ub: caps[3].parse().ok()?,
                structure: Some(structure),
            })
        })
        .collect()
}

/// Parse the engine's output structure file.
pub fn parse_output_structure(path: &Path) -> Result<Vec<DockedPose>> {
    let text = std::fs::read_to_string(path)?;
    let poses = parse_structure_text(&text);
    debug!(path = %path.display(), poses = poses.len(), "Parsed output structure");
    Ok(poses)
}

/// Combine stdout scores with structures from the output file.
pub fn parse_combined(stdout: &str, structure_path: Option<&Path>) -> Vec<DockedPose> {
    let mut poses = parse_console_output(stdout);
    let Some(path) = structure_path else { return poses };

    let structures = match parse_output_structure(path) {
        Ok(structures) => structures,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Could not read output structure");
            return poses;
        }
    };
    if poses.is_empty() {
        return structures;
    }
    for pose in &mut poses {
        pose.structure = structures
            .iter()
            .find(|s| s.pose_number == pose.pose_number)
            .and_then(|s| s.structure.clone());
    }
    poses
}

/// Pose with the most negative affinity.
pub fn best_pose(poses: &[DockedPose]) -> Option<&DockedPose> {
    poses.iter().min_by(|a, b| a.affinity.total_cmp(&b.affinity))
}

pub fn summary_statistics(poses: &[DockedPose]) -> PoseSummary {
    if poses.is_empty() {
        return PoseSummary::default();
    }
    let affinities = poses.iter().map(|p| p.affinity);
    let best = affinities.clone().fold(f64::INFINITY, f64::min);
    let worst = affinities.clone().fold(f64::NEG_INFINITY, f64::max);
    let mean = affinities.sum::<f64>() / poses.len() as f64;
    PoseSummary {
        count: poses.len(),
        best: Some(best),
        worst: Some(worst),
        mean: Some(mean),
        range: Some(worst - best),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONSOLE: &str = "\
AutoDock Vina v1.2.5
Performing docking (random seed: 42) ... done.

mode |   affinity | dist from best mode
     | (kcal/mol) | rmsd l.b.| rmsd u.b.
-----+------------+----------+----------
   1       -8.5      0.000      0.000
   2       -7.9      1.234      2.456

Writing output ... done.
";

    const STRUCTURE: &str = "\
MODEL 1
REMARK VINA RESULT:    -8.500      0.000      0.000
ATOM      1  C1  UNL     1       1.000   2.000   3.000  1.00  0.00     0.000 C
ENDMDL
MODEL 2
REMARK VINA RESULT:    -7.900      1.234      2.456
ATOM      1  C1  UNL     1       4.000   5.000   6.000  1.00  0.00     0.000 C
ENDMDL
MODEL 3
ATOM      1  C1  UNL     1       7.000   8.000   9.000  1.00  0.00     0.000 C
ENDMDL
";

    #[test]
    fn test_console_table() {
        let poses = parse_console_output(CONSOLE);
        assert_eq!(poses.len(), 2);
        assert_eq!(poses[0].pose_number, 1);
        assert_eq!(poses[0].affinity, -8.5);
        assert_eq!(poses[1].rmsd_ub, 2.456);
        assert_eq!(best_pose(&poses).map(|p| p.pose_number), Some(1));
    }

    #[test]
    fn test_console_table_ends_on_unrelated_line() {
        let text = "mode | affinity\n  garbage\n---\n 1 -6.0 0 0\nRefining\n 2 -5.0 1 1\n";
        let poses = parse_console_output(text);
        assert_eq!(poses.len(), 1);
        assert!(parse_console_output("no table here").is_empty());
    }

    #[test]
    fn test_structure_models() {
        let poses = parse_structure_text(STRUCTURE);
        assert_eq!(poses.len(), 2, "model without remark is skipped");
        let payload = poses[1].structure.as_deref().unwrap();
        assert!(payload.starts_with("MODEL 2\n"));
        assert!(payload.ends_with("ENDMDL\n"));
        assert!(payload.contains("4.000"));
    }

    #[test]
    fn test_structure_without_model_markers() {
        let text = "REMARK VINA RESULT:    -6.100      0.000      0.000\nATOM      1  C1  UNL\n";
        let poses = parse_structure_text(text);
        assert_eq!(poses.len(), 1);
        assert_eq!(poses[0].pose_number, 1);
        assert_eq!(poses[0].affinity, -6.1);
    }

    #[test]
    fn test_combined_merges_by_pose_number() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.pdbqt");
        let only_second = STRUCTURE.split("MODEL 2").nth(1).map(|rest| format!("MODEL 2{rest}")).unwrap();
        std::fs::write(&path, only_second).unwrap();

        let poses = parse_combined(CONSOLE, Some(&path));
        assert_eq!(poses.len(), 2);
        assert!(poses[0].structure.is_none());
        assert!(poses[1].structure.as_deref().unwrap().contains("4.000"));
    }

    #[test]
    fn test_combined_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.pdbqt");
        std::fs::write(&path, STRUCTURE).unwrap();
        assert_eq!(parse_combined("", Some(&path)).len(), 2);

        let poses = parse_combined(CONSOLE, Some(&dir.path().join("missing.pdbqt")));
        assert_eq!(poses.len(), 2);
        assert!(poses.iter().all(|p| p.structure.is_none()));
    }

    #[test]
    fn test_best_and_summary() {
        assert!(best_pose(&[]).is_none());
        assert_eq!(summary_statistics(&[]), PoseSummary::default());

        let mut poses = parse_console_output(CONSOLE);
        poses.push(DockedPose { pose_number: 3, affinity: -9.25, rmsd_lb: 2.0, rmsd_ub: 3.0, structure: None });
        assert_eq!(best_pose(&poses).map(|p| p.pose_number), Some(3));

        let summary = summary_statistics(&poses);
        assert_eq!(summary.count, 3);
        assert_eq!(summary.best, Some(-9.25));
        assert_eq!(summary.worst, Some(-7.9));
        assert!((summary.range.unwrap() - 1.35).abs() < 1e-9);
        assert!((summary.mean.unwrap() - (-8.5 - 7.9 - 9.25) / 3.0).abs() < 1e-9);
    }
}
