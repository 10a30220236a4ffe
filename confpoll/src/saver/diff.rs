//! Line diff between two configuration captures.
//!
//! Used only to show what changed in the logs. Common leading and
//! trailing lines are matched directly; the differing middle goes
//! through a longest-common-subsequence table, or is shown as a plain
//! remove-then-add block when it is too large for one.

use std::fmt::Write;

/// Largest LCS table (cells) built for one diff.
const MAX_TABLE_CELLS: usize = 4_000_000;

/// One line of a diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffLine<'a> {
    Unchanged(&'a str),
    Added(&'a str),
    Removed(&'a str),
}

/// Diff `old` against `new` line by line.
pub fn line_diff<'a>(old: &'a str, new: &'a str) -> Vec<DiffLine<'a>> {
    let old: Vec<&str> = old.lines().collect();
    let new: Vec<&str> = new.lines().collect();

    let prefix = old.iter().zip(&new).take_while(|(a, b)| a == b).count();
    let suffix = old[prefix..]
        .iter()
        .rev()
        .zip(new[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();

    let old_mid = &old[prefix..old.len() - suffix];
    let new_mid = &new[prefix..new.len() - suffix];

    let mut out = Vec::with_capacity(old.len().max(new.len()));
    out.extend(old[..prefix].iter().map(|&line| DiffLine::Unchanged(line)));

    if old_mid.len().saturating_mul(new_mid.len()) > MAX_TABLE_CELLS {
        out.extend(old_mid.iter().map(|&line| DiffLine::Removed(line)));
        out.extend(new_mid.iter().map(|&line| DiffLine::Added(line)));
    } else {
        lcs_diff(old_mid, new_mid, &mut out);
    }

    out.extend(old[old.len() - suffix..].iter().map(|&line| DiffLine::Unchanged(line)));
    out
}

fn lcs_diff<'a>(old: &[&'a str], new: &[&'a str], out: &mut Vec<DiffLine<'a>>) {
    let (n, m) = (old.len(), new.len());
    let width = m + 1;

    // table[i * width + j] = LCS length of old[i..] and new[j..]
    let mut table = vec![0u32; (n + 1) * width];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[i * width + j] = if old[i] == new[j] {
                table[(i + 1) * width + j + 1] + 1
            } else {
                table[(i + 1) * width + j].max(table[i * width + j + 1])
            };
        }
    }

    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if old[i] == new[j] {
            out.push(DiffLine::Unchanged(old[i]));
            i += 1;
            j += 1;
        } else if table[(i + 1) * width + j] >= table[i * width + j + 1] {
            out.push(DiffLine::Removed(old[i]));
            i += 1;
        } else {
            out.push(DiffLine::Added(new[j]));
            j += 1;
        }
    }
    out.extend(old[i..].iter().map(|&line| DiffLine::Removed(line)));
    out.extend(new[j..].iter().map(|&line| DiffLine::Added(line)));
}

/// Render the changed lines with `+ ` / `- ` prefixes.
pub fn render(diff: &[DiffLine<'_>]) -> String {
    let mut out = String::new();
    for line in diff {
        match line {
            DiffLine::Unchanged(_) => {}
            DiffLine::Added(text) => {
                let _ = writeln!(out, "+ {text}");
            }
            DiffLine::Removed(text) => {
                let _ = writeln!(out, "- {text}");
            }
        }
    }
    out
}

/// Count of (added, removed) lines.
pub fn stats(diff: &[DiffLine<'_>]) -> (usize, usize) {
    diff.iter().fold((0, 0), |(added, removed), line| match line {
        DiffLine::Added(_) => (added + 1, removed),
        DiffLine::Removed(_) => (added, removed + 1),
        DiffLine::Unchanged(_) => (added, removed),
    })
}
