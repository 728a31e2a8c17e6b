//! Text layout file.
//!
//! ```text
//! ## hibf layout
//! ## num_user_bins = 3
//! ## num_hash_functions = 2
//! ## false_positive_rate = 0.05
//! ## t_max = 64
//! ## max_level_id = 1
//! ## candidate	<stats summary row>        (one per candidate, search only)
//! ## best_t_max = 64                         (search only)
//! #LEVEL	0	64	-
//! #LEVEL	1	64	0:63
//! #USER_BIN_IDX	NAME	KMER_COUNT	LEVEL	SLOTS	ROLE	GROUP
//! 0	a.fa	900	0	0-61	split	-
//! 1	b.fa	10	1	0	single	-
//! ```
//!
//! `##` lines carry parameters, `#LEVEL` lines the level tree (`parent` is
//! `level:slot` or `-`), every other line is one user bin. `SLOTS` is a slot
//! index or an inclusive range. The records alone reproduce the placement.

use crate::config::LayoutConfig;
use crate::errors::{HibfError, Result};
use crate::layout::{IndexLevel, Layout, ParentSlot, Placement, Role, Slot};
use crate::search::CandidateSummary;
use crate::user_bin::UserBin;
use crate::utils::write_atomic;
use std::collections::HashMap;
use std::path::Path;

const TITLE: &str = "## hibf layout";
const LEVEL_PREFIX: &str = "#LEVEL";
const COLUMNS: &str = "#USER_BIN_IDX\tNAME\tKMER_COUNT\tLEVEL\tSLOTS\tROLE\tGROUP";
const CANDIDATE_PREFIX: &str = "## candidate\t";

/// Run parameters echoed in the header; the build phase reads them back.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutParams {
    pub num_hash_functions: usize,
    pub false_positive_rate: f64,
    pub t_max: usize,
}

impl From<&LayoutConfig> for LayoutParams {
    fn from(c: &LayoutConfig) -> Self {
        Self {
            num_hash_functions: c.num_hash_functions,
            false_positive_rate: c.false_positive_rate,
            t_max: c.t_max,
        }
    }
}

/// Render a layout. `candidates` is empty when no search ran.
pub fn write(layout: &Layout, params: &LayoutParams, candidates: &[CandidateSummary]) -> Result<String> {
    let mut out = String::new();
    out.push_str(TITLE);
    out.push('\n');
    out.push_str(&format!("## num_user_bins = {}\n", layout.user_bins.len()));
    out.push_str(&format!("## num_hash_functions = {}\n", params.num_hash_functions));
    out.push_str(&format!("## false_positive_rate = {}\n", params.false_positive_rate));
    out.push_str(&format!("## t_max = {}\n", params.t_max));
    match layout.max_level_id() {
        Some(id) => out.push_str(&format!("## max_level_id = {id}\n")),
        None => out.push_str("## max_level_id = -\n"),
    }
    for c in candidates {
        out.push_str(CANDIDATE_PREFIX);
        out.push_str(&c.summary_row);
        out.push('\n');
    }
    if !candidates.is_empty() {
        out.push_str(&format!("## best_t_max = {}\n", params.t_max));
    }

    for lvl in &layout.levels {
        let parent = match lvl.parent {
            Some(p) => format!("{}:{}", p.level, p.slot),
            None => "-".to_string(),
        };
        out.push_str(&format!("{LEVEL_PREFIX}\t{}\t{}\t{}\n", lvl.id, lvl.t_max, parent));
    }

    out.push_str(COLUMNS);
    out.push('\n');
    for (idx, (bin, p)) in layout.user_bins.iter().zip(&layout.placements).enumerate() {
        if bin.name.contains(['\t', '\n', '\r']) {
            return Err(HibfError::Config(format!("user bin name {:?} contains a tab or newline", bin.name)));
        }
        let slots = if p.span == 1 {
            p.slot.to_string()
        } else {
            format!("{}-{}", p.slot, p.slot + p.span - 1)
        };
        let group = match p.role {
            Role::Merged { group } => group.to_string(),
            _ => "-".to_string(),
        };
        out.push_str(&format!(
            "{idx}\t{}\t{}\t{}\t{slots}\t{}\t{group}\n",
            bin.name,
            bin.kmer_count,
            p.level,
            p.role.name()
        ));
    }
    Ok(out)
}

pub fn write_to_path(path: &Path, layout: &Layout, params: &LayoutParams, candidates: &[CandidateSummary]) -> Result<()> {
    let text = write(layout, params, candidates)?;
    write_atomic(path, text.as_bytes())
}

pub fn read_from_path(path: &Path) -> Result<(LayoutParams, Layout)> {
    let text = std::fs::read_to_string(path).map_err(|e| HibfError::resource(path, e))?;
    read(&text)
}

#[derive(Default)]
struct Header {
    num_user_bins: Option<usize>,
    num_hash_functions: Option<usize>,
    false_positive_rate: Option<f64>,
    t_max: Option<usize>,
}

/// Parse a layout file and check that it describes a coherent tree.
pub fn read(text: &str) -> Result<(LayoutParams, Layout)> {
    let mut header = Header::default();
    let mut levels: Vec<IndexLevel> = Vec::new();
    let mut user_bins = Vec::new();
    let mut placements = Vec::new();
    let mut groups: HashMap<usize, (usize, usize)> = HashMap::new();

    for (i, raw) in text.lines().enumerate() {
        let lineno = i + 1;
        let line = raw.trim_end_matches('\r');
        if line.trim().is_empty() || line.starts_with(CANDIDATE_PREFIX) || line == COLUMNS {
            continue;
        }
        if let Some(rest) = line.strip_prefix("##") {
            parse_param(rest, lineno, &mut header)?;
            continue;
        }
        if let Some(rest) = line.strip_prefix(LEVEL_PREFIX) {
            let level = parse_level(rest, lineno, levels.len())?;
            levels.push(level);
            continue;
        }
        if line.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != 7 {
            return Err(HibfError::parse(lineno, format!("expected 7 fields, got {}", fields.len())));
        }
        let idx: usize = parse_num(fields[0], lineno, "user bin index")?;
        if idx != user_bins.len() {
            return Err(HibfError::parse(lineno, format!("user bin index {idx} out of order")));
        }
        let kmer_count: u64 = parse_num(fields[2], lineno, "kmer count")?;
        let level: usize = parse_num(fields[3], lineno, "level")?;
        let (slot, span) = parse_slots(fields[4], lineno)?;
        let lvl = levels
            .get_mut(level)
            .ok_or_else(|| HibfError::parse(lineno, format!("unknown level {level}")))?;
        if slot.checked_add(span).map_or(true, |end| end > lvl.t_max) {
            return Err(HibfError::parse(lineno, format!("slots {} exceed t_max {}", fields[4], lvl.t_max)));
        }

        let role = match (fields[5], fields[6]) {
            ("single", "-") if span == 1 => {
                claim(&mut lvl.slots[slot], Slot::Single { user_bin: idx }, lineno)?;
                Role::Single
            }
            ("split", "-") if span > 1 => {
                for part in 0..span {
                    claim(&mut lvl.slots[slot + part], Slot::Split { user_bin: idx, part, of: span }, lineno)?;
                }
                Role::Split
            }
            ("merged", g) if span == 1 => {
                let group: usize = parse_num(g, lineno, "group")?;
                if *groups.entry(group).or_insert((level, slot)) != (level, slot) {
                    return Err(HibfError::parse(lineno, format!("merged group {group} spans several slots")));
                }
                match &mut lvl.slots[slot] {
                    Slot::Merged { group: g, members } if *g == group => members.push(idx),
                    s @ Slot::Empty => *s = Slot::Merged { group, members: vec![idx] },
                    _ => return Err(HibfError::parse(lineno, format!("slot {slot} on level {level} already taken"))),
                }
                Role::Merged { group }
            }
            (role, group) => {
                return Err(HibfError::parse(
                    lineno,
                    format!("invalid role {role:?} with group {group:?} over {span} slot(s)"),
                ))
            }
        };
        user_bins.push(UserBin::new(fields[1], kmer_count));
        placements.push(Placement { level, slot, span, role });
    }

    let params = LayoutParams {
        num_hash_functions: header.num_hash_functions.ok_or_else(|| missing("num_hash_functions"))?,
        false_positive_rate: header.false_positive_rate.ok_or_else(|| missing("false_positive_rate"))?,
        t_max: header.t_max.ok_or_else(|| missing("t_max"))?,
    };
    if let Some(root) = levels.first() {
        if root.t_max != params.t_max {
            return Err(HibfError::Consistency(format!(
                "root level has {} technical bins, header says {}",
                root.t_max, params.t_max
            )));
        }
    }
    if let Some(n) = header.num_user_bins {
        if n != user_bins.len() {
            return Err(HibfError::Consistency(format!(
                "header announces {n} user bins, file has {}",
                user_bins.len()
            )));
        }
    }

    // attach children to their parent slots
    for id in 0..levels.len() {
        if let Some(ParentSlot { level, slot }) = levels[id].parent {
            let parent = &mut levels[level];
            if slot >= parent.t_max || parent.slots[slot] != Slot::Empty {
                return Err(HibfError::Consistency(format!(
                    "level {id} hangs from {level}:{slot}, which is not a free slot"
                )));
            }
            parent.slots[slot] = Slot::Recursed { child: id };
        }
    }

    Ok((params, Layout { t_max: params.t_max, user_bins, levels, placements }))
}

fn missing(key: &str) -> HibfError {
    HibfError::Config(format!("layout header is missing {key}"))
}

fn claim(slot: &mut Slot, value: Slot, lineno: usize) -> Result<()> {
    if *slot != Slot::Empty {
        return Err(HibfError::parse(lineno, "slot already taken"));
    }
    *slot = value;
    Ok(())
}

fn parse_num<T: std::str::FromStr>(s: &str, lineno: usize, what: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    s.trim().parse::<T>().map_err(|e| HibfError::parse(lineno, format!("bad {what} {s:?}: {e}")))
}

fn parse_param(rest: &str, lineno: usize, header: &mut Header) -> Result<()> {
    let Some((key, value)) = rest.split_once('=') else { return Ok(()) };
    match key.trim() {
        "num_user_bins" => header.num_user_bins = Some(parse_num(value, lineno, "num_user_bins")?),
        "num_hash_functions" => header.num_hash_functions = Some(parse_num(value, lineno, "num_hash_functions")?),
        "false_positive_rate" => header.false_positive_rate = Some(parse_num(value, lineno, "false_positive_rate")?),
        "t_max" => header.t_max = Some(parse_num(value, lineno, "t_max")?),
        _ => {}
    }
    Ok(())
}

fn parse_level(rest: &str, lineno: usize, expected_id: usize) -> Result<IndexLevel> {
    let fields: Vec<&str> = rest.trim_start_matches('\t').split('\t').collect();
    if fields.len() != 3 {
        return Err(HibfError::parse(lineno, "expected #LEVEL <id> <t_max> <parent>"));
    }
    let id: usize = parse_num(fields[0], lineno, "level id")?;
    if id != expected_id {
        return Err(HibfError::parse(lineno, format!("level {id} out of order")));
    }
    let t_max: usize = parse_num(fields[1], lineno, "level t_max")?;
    if t_max == 0 || t_max % 64 != 0 {
        return Err(HibfError::parse(lineno, format!("level t_max {t_max} is not a positive multiple of 64")));
    }
    let parent = match fields[2] {
        "-" if id == 0 => None,
        "-" => return Err(HibfError::parse(lineno, format!("level {id} has no parent"))),
        p => {
            let (l, s) = p
                .split_once(':')
                .ok_or_else(|| HibfError::parse(lineno, format!("bad parent {p:?}")))?;
            let level: usize = parse_num(l, lineno, "parent level")?;
            let slot: usize = parse_num(s, lineno, "parent slot")?;
            if level >= id {
                return Err(HibfError::parse(lineno, format!("parent level {level} must precede {id}")));
            }
            Some(ParentSlot { level, slot })
        }
    };
    Ok(IndexLevel::new(id, t_max, parent))
}

fn parse_slots(s: &str, lineno: usize) -> Result<(usize, usize)> {
    match s.split_once('-') {
        Some((a, b)) => {
            let start: usize = parse_num(a, lineno, "slot range start")?;
            let end: usize = parse_num(b, lineno, "slot range end")?;
            if end < start {
                return Err(HibfError::parse(lineno, format!("empty slot range {s:?}")));
            }
            let span = (end - start)
                .checked_add(1)
                .ok_or_else(|| HibfError::parse(lineno, format!("slot range {s:?} too wide")))?;
            Ok((start, span))
        }
        None => Ok((parse_num(s, lineno, "slot")?, 1)),
    }
}
