use std::time::Duration;

use appup_core::SelectionCount;
use appup_core::models::UpgradeCandidate;
use indicatif::{ProgressBar, ProgressStyle};

const COLUMN_GAP: &str = "  ";
const HEADERS: [&str; 4] = ["Name", "Id", "Current", "Available"];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ProgressState {
    Running,
    Done,
    Canceled,
}

/// Candidate list as aligned text columns, header and rule first.
pub fn render_candidate_table(candidates: &[UpgradeCandidate]) -> Vec<String> {
    let rows: Vec<[&str; 4]> = candidates
        .iter()
        .map(|candidate| {
            [
                candidate.display_name.as_str(),
                candidate.identifier.as_str(),
                candidate.current_version.as_str(),
                candidate.available_version.as_str(),
            ]
        })
        .collect();

    let mut widths = HEADERS.map(|header| header.chars().count());
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let total_width = widths.iter().sum::<usize>() + COLUMN_GAP.len() * (widths.len() - 1);
    let mut lines = Vec::with_capacity(rows.len() + 2);
    lines.push(render_row(&HEADERS, &widths));
    lines.push("-".repeat(total_width));
    lines.extend(rows.iter().map(|row| render_row(row, &widths)));
    lines
}

fn render_row(cells: &[&str; 4], widths: &[usize; 4]) -> String {
    let padded: Vec<String> = cells
        .iter()
        .zip(widths)
        .map(|(cell, &width)| format!("{cell:<width$}"))
        .collect();
    padded.join(COLUMN_GAP).trim_end().to_string()
}

pub fn print_candidates(candidates: &[UpgradeCandidate], count: SelectionCount) {
    for line in render_candidate_table(candidates) {
        println!("{line}");
    }
    println!();
    println!("{}", count.summary());
}

/// Progress bar for a running batch. Tool output goes above the bar; when the
/// bar is hidden (stderr not a terminal) it goes straight to stdout.
pub struct BatchProgress {
    total: u64,
    completed: u64,
    progress_bar: ProgressBar,
}

impl BatchProgress {
    pub fn start(total: usize) -> Self {
        let total = total as u64;
        let progress_bar = ProgressBar::new(total.max(1));
        if let Ok(style) =
            ProgressStyle::with_template("{spinner:.cyan.bold} {msg} [{bar:24.cyan/blue}]")
        {
            progress_bar.set_style(style.progress_chars("=>-"));
        }
        progress_bar.set_message(progress_label(0, total, ProgressState::Running));
        progress_bar.enable_steady_tick(Duration::from_millis(100));

        Self {
            total,
            completed: 0,
            progress_bar,
        }
    }

    pub fn println(&self, line: &str) {
        if self.progress_bar.is_hidden() {
            println!("{line}");
        } else {
            self.progress_bar.println(line);
        }
    }

    pub fn item_done(&mut self) {
        self.completed = (self.completed + 1).min(self.total);
        self.progress_bar.set_position(self.completed);
        self.progress_bar.set_message(progress_label(
            self.completed,
            self.total,
            ProgressState::Running,
        ));
    }

    pub fn finish_done(self) {
        self.finish(ProgressState::Done);
    }

    pub fn finish_canceled(self) {
        self.finish(ProgressState::Canceled);
    }

    fn finish(self, state: ProgressState) {
        let label = progress_label(self.completed, self.total, state);
        if self.progress_bar.is_hidden() {
            println!("{label}");
        }
        self.progress_bar.finish_with_message(label);
    }
}

pub fn batch_started(total: usize) -> String {
    format!("Starting updates for {total} package(s)...")
}

pub fn item_started(identifier: &str) -> String {
    format!("Updating {identifier} ...")
}

/// Printed for every package the batch started, failed or not.
pub fn item_finished(identifier: &str) -> String {
    format!("\u{2714} Finished {identifier}")
}

fn progress_label(completed: u64, total: u64, state: ProgressState) -> String {
    let suffix = match state {
        ProgressState::Running => "",
        ProgressState::Done => " (done)",
        ProgressState::Canceled => " (canceled)",
    };
    format!("Updating: {completed}/{total}{suffix}")
}

#[cfg(test)]
mod tests {
    use appup_core::models::UpgradeCandidate;

    use super::{
        ProgressState, batch_started, item_finished, item_started, progress_label,
        render_candidate_table,
    };

    fn candidate(name: &str, id: &str, current: &str, available: &str) -> UpgradeCandidate {
        UpgradeCandidate {
            display_name: name.to_string(),
            identifier: id.to_string(),
            current_version: current.to_string(),
            available_version: available.to_string(),
        }
    }

    #[test]
    fn table_columns_are_aligned_to_widest_cell() {
        let lines = render_candidate_table(&[
            candidate("Git", "Git.Git", "2.44.0", "2.45.1"),
            candidate("Microsoft Visual Studio Code", "Microsoft.VisualStudioCode", "", "1.90.0"),
        ]);

        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("Name "));
        assert!(lines[1].chars().all(|c| c == '-'));

        let id_column = lines[0].find("Id").unwrap();
        assert_eq!(lines[2].find("Git.Git"), Some(id_column));
        assert_eq!(lines[3].find("Microsoft.VisualStudioCode"), Some(id_column));
        assert!(lines[3].ends_with("1.90.0"));
    }

    #[test]
    fn empty_table_still_has_a_header() {
        let lines = render_candidate_table(&[]);
        assert_eq!(lines[0], "Name  Id  Current  Available");
        assert_eq!(lines[1].len(), lines[0].len());
    }

    #[test]
    fn batch_markers_name_each_package() {
        assert_eq!(batch_started(2), "Starting updates for 2 package(s)...");
        assert_eq!(item_started("Git.Git"), "Updating Git.Git ...");
        assert_eq!(item_finished("Git.Git"), "\u{2714} Finished Git.Git");
    }

    #[test]
    fn progress_label_carries_final_state() {
        assert_eq!(progress_label(1, 3, ProgressState::Running), "Updating: 1/3");
        assert_eq!(progress_label(3, 3, ProgressState::Done), "Updating: 3/3 (done)");
        assert_eq!(
            progress_label(1, 3, ProgressState::Canceled),
            "Updating: 1/3 (canceled)"
        );
    }
}
