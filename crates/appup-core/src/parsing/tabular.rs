use crate::models::UpgradeCandidate;

const HEADER_WORDS: [&str; 3] = ["Name", "Id", "Available"];
const NO_UPDATES_SENTINEL: &str = "No applicable updates";

/// Result of reading column-aligned table output.
///
/// `NoTable` and an empty `Rows` both carry no candidates but mean different
/// things: the first says the output was not a table at all, the second that a
/// table was found but none of its rows were usable.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TableParse {
    NoTable,
    NoApplicableUpdates,
    Rows(Vec<UpgradeCandidate>),
}

/// Fallback parser for the plain table printed by `winget upgrade`.
///
/// Rows are split on runs of two or more whitespace characters. A row with as
/// many fields as the header is read by column title. Any other row falls back
/// to position: five or more fields read as name, id, current, available;
/// exactly four read as name, id, available with no current version. That
/// fallback cannot tell a missing column from a name that happens to contain a
/// double space.
pub fn parse_table(output: &str) -> TableParse {
    let lines: Vec<&str> = output
        .split(['\n', '\r'])
        .filter(|line| !line.trim().is_empty())
        .collect();

    let Some(header_index) = lines.iter().position(|line| is_header(line)) else {
        return TableParse::NoTable;
    };
    if header_index + 1 >= lines.len() {
        return TableParse::NoTable;
    }

    let mut layout = HeaderLayout::from_line(lines[header_index]);
    let mut start = header_index + 1;
    if is_separator(lines[start]) {
        start += 1;
    }

    let mut candidates = Vec::new();
    for line in &lines[start..] {
        if line.contains(NO_UPDATES_SENTINEL) {
            return TableParse::NoApplicableUpdates;
        }
        // Later sections (pinned or explicit-targeting packages) repeat the header.
        if is_header(line) {
            layout = HeaderLayout::from_line(line);
            continue;
        }
        if let Some(candidate) = parse_row(line, &layout) {
            candidates.push(candidate);
        }
    }

    TableParse::Rows(candidates)
}

/// Whether the tool printed its "no applicable updates" message anywhere in
/// the output, table or not.
pub fn reports_no_updates(output: &str) -> bool {
    output.contains(NO_UPDATES_SENTINEL)
}

/// Column positions taken from a header row.
#[derive(Debug)]
struct HeaderLayout {
    width: usize,
    name: Option<usize>,
    identifier: Option<usize>,
    version: Option<usize>,
    available: Option<usize>,
}

impl HeaderLayout {
    fn from_line(line: &str) -> Self {
        let titles = split_columns(line.trim());
        let find = |title: &str| titles.iter().position(|column| *column == title);
        Self {
            width: titles.len(),
            name: find("Name"),
            identifier: find("Id"),
            version: find("Version"),
            available: find("Available"),
        }
    }

    fn read<'a>(&self, columns: &[&'a str]) -> Option<(&'a str, &'a str, &'a str, &'a str)> {
        if columns.len() != self.width {
            return None;
        }
        let field = |index: Option<usize>| index.and_then(|index| columns.get(index).copied());
        Some((
            field(self.name)?,
            field(self.identifier)?,
            field(self.version).unwrap_or(""),
            field(self.available)?,
        ))
    }
}

fn parse_row(line: &str, layout: &HeaderLayout) -> Option<UpgradeCandidate> {
    let columns = split_columns(line.trim_end());
    let (name, identifier, current, available) = match layout.read(&columns) {
        Some(fields) => fields,
        None => match columns.as_slice() {
            [name, identifier, current, available, _, ..] => {
                (*name, *identifier, *current, *available)
            }
            [name, identifier, available, _] => (*name, *identifier, "", *available),
            _ => return None,
        },
    };

    if name.starts_with('-') {
        return None;
    }
    UpgradeCandidate::from_fields(name, identifier, current, available)
}

fn is_header(line: &str) -> bool {
    HEADER_WORDS.iter().all(|word| contains_word(line, word))
}

fn is_separator(line: &str) -> bool {
    line.contains('-') && line.chars().all(|c| c == '-' || c.is_whitespace())
}

fn contains_word(line: &str, word: &str) -> bool {
    line.match_indices(word).any(|(start, _)| {
        let before = line[..start].chars().next_back();
        let after = line[start + word.len()..].chars().next();
        !before.is_some_and(is_word_char) && !after.is_some_and(is_word_char)
    })
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Splits on runs of at least two whitespace characters. A leading run yields
/// an empty first column, matching how the row would read positionally.
fn split_columns(line: &str) -> Vec<&str> {
    let mut columns = Vec::new();
    let mut column_start = 0;
    let mut run_start: Option<usize> = None;
    let mut run_len = 0;

    for (index, c) in line.char_indices() {
        if c.is_whitespace() {
            if run_start.is_none() {
                run_start = Some(index);
                run_len = 0;
            }
            run_len += 1;
            continue;
        }
        if let Some(start) = run_start.take()
            && run_len >= 2
        {
            columns.push(&line[column_start..start]);
            column_start = index;
        }
    }

    match run_start {
        Some(start) if run_len >= 2 => columns.push(&line[column_start..start]),
        _ => columns.push(&line[column_start..]),
    }
    columns
}

#[cfg(test)]
mod tests {
    use super::{TableParse, contains_word, parse_table, reports_no_updates, split_columns};
    use crate::models::UpgradeCandidate;

    const TABLE_FIXTURE: &str = include_str!("../../tests/fixtures/winget/upgrade_table.txt");
    const CRLF_FIXTURE: &str = include_str!("../../tests/fixtures/winget/upgrade_table_crlf.txt");
    const NONE_FIXTURE: &str = include_str!("../../tests/fixtures/winget/upgrade_none.txt");

    fn rows(parse: TableParse) -> Vec<UpgradeCandidate> {
        match parse {
            TableParse::Rows(rows) => rows,
            other => panic!("expected rows, got {other:?}"),
        }
    }

    #[test]
    fn parses_minimal_table() {
        let parsed = rows(parse_table(
            "Name  Id  Version  Available\n----\nApp1  vendor.App1  1.0  2.0\n",
        ));
        assert_eq!(
            parsed,
            vec![UpgradeCandidate {
                display_name: "App1".to_string(),
                identifier: "vendor.App1".to_string(),
                current_version: "1.0".to_string(),
                available_version: "2.0".to_string(),
            }]
        );
    }

    #[test]
    fn parses_fixture_and_skips_footer_noise() {
        let parsed = rows(parse_table(TABLE_FIXTURE));
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[1].display_name, "Microsoft Visual Studio Code");
        assert_eq!(parsed[1].identifier, "Microsoft.VisualStudioCode");
        assert_eq!(parsed[1].current_version, "1.93.0");
        assert_eq!(parsed[1].available_version, "1.94.2");
        assert_eq!(parsed[2].display_name, "PowerToys (Preview)");
    }

    #[test]
    fn carriage_returns_separate_spinner_frames_from_the_header() {
        let parsed = rows(parse_table(CRLF_FIXTURE));
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].identifier, "Notepad++.Notepad++");
        assert_eq!(parsed[0].current_version, "8.6.9");
        assert_eq!(parsed[0].available_version, "8.7");
    }

    #[test]
    fn four_columns_leave_current_version_empty() {
        let parsed = rows(parse_table(
            "Name  Id  Available  Source\nTool  acme.Tool  3.1  winget\n",
        ));
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].current_version, "");
        assert_eq!(parsed[0].available_version, "3.1");
    }

    #[test]
    fn rows_shorter_than_the_header_fall_back_to_position() {
        let output = "Name  Id  Version  Available  Source\n\
                      ------------------------------------\n\
                      Store App  store.App  2.0  msstore\n\
                      Full  full.App  1.0  2.0  winget\n";
        let parsed = rows(parse_table(output));
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].identifier, "store.App");
        assert_eq!(parsed[0].current_version, "");
        assert_eq!(parsed[0].available_version, "2.0");
        assert_eq!(parsed[1].current_version, "1.0");
        assert_eq!(parsed[1].available_version, "2.0");
    }

    #[test]
    fn columns_are_read_by_title_when_the_header_adds_one() {
        let output = "Name  Id  Version  Match  Available  Source\n\
                      Tool  acme.Tool  1.2  Tag: tool  1.3  winget\n";
        let parsed = rows(parse_table(output));
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].current_version, "1.2");
        assert_eq!(parsed[0].available_version, "1.3");
    }

    #[test]
    fn sentinel_short_circuits_even_after_rows() {
        let output = "Name  Id  Version  Available\n\
                      App1  vendor.App1  1.0  2.0\n\
                      No applicable updates found.\n\
                      App2  vendor.App2  1.0  2.0\n";
        assert_eq!(parse_table(output), TableParse::NoApplicableUpdates);
    }

    #[test]
    fn sentinel_before_any_header_is_not_a_table() {
        assert_eq!(parse_table(NONE_FIXTURE), TableParse::NoTable);
        assert!(reports_no_updates(NONE_FIXTURE));
        assert!(!reports_no_updates(TABLE_FIXTURE));
    }

    #[test]
    fn missing_or_trailing_header_is_not_a_table() {
        assert_eq!(parse_table("nothing to see here"), TableParse::NoTable);
        assert_eq!(parse_table(""), TableParse::NoTable);
        assert_eq!(
            parse_table("noise\nName  Id  Version  Available\n\n"),
            TableParse::NoTable
        );
    }

    #[test]
    fn header_words_must_be_whole_words() {
        assert_eq!(
            parse_table("PackageName  Identifier  Availability\nA  b.A  1  2\n"),
            TableParse::NoTable
        );
        assert!(contains_word("Available  Id  Name", "Id"));
        assert!(!contains_word("Identifier", "Id"));
    }

    #[test]
    fn drops_short_rows_and_dash_fragments() {
        let output = "Name  Id  Version  Available  Source\n\
                      ---------------------------------\n\
                      just two  columns\n\
                      --  frag.Id  1.0  2.0  winget\n\
                      Kept  kept.Id  1.0  2.0  winget\n";
        let parsed = rows(parse_table(output));
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].identifier, "kept.Id");
    }

    #[test]
    fn repeated_header_rows_are_not_candidates() {
        let output = "Name  Id  Version  Available  Source\n\
                      A  a.A  1.0  2.0  winget\n\
                      The following packages have an upgrade available, but require explicit targeting for upgrade:\n\
                      Name  Id  Version  Available  Source\n\
                      ------------------------------------\n\
                      B  b.B  1.0  2.0  winget\n";
        let ids: Vec<String> = rows(parse_table(output))
            .into_iter()
            .map(|candidate| candidate.identifier)
            .collect();
        assert_eq!(ids, vec!["a.A", "b.B"]);
    }

    #[test]
    fn splits_only_on_double_whitespace() {
        assert_eq!(
            split_columns("Visual Studio Code  Microsoft.VSCode\t\t1.0  2.0"),
            vec!["Visual Studio Code", "Microsoft.VSCode", "1.0", "2.0"]
        );
        assert_eq!(split_columns("  leading  x"), vec!["", "leading", "x"]);
        assert_eq!(split_columns("single"), vec!["single"]);
    }
}
