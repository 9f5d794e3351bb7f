use tracing::debug;

use crate::errors::ParserError;
use crate::fields::matches_any_field;
use crate::model::{parse_numeric, DecodedSource, IngestOptions, RawTable, SourceFormat};
use crate::registry::FormatParser;

use super::common::{table_from_grid, GridRow};

/// Candidate delimiters in tie-break order.
const CANDIDATES: [char; 5] = [',', ';', '\t', '|', ' '];

/// Share of control characters above which text is treated as binary.
const BINARY_CONTROL_RATIO: f64 = 0.05;

pub struct DelimitedParser;

impl Default for DelimitedParser {
    fn default() -> Self {
        Self
    }
}

impl DelimitedParser {
    const NAME: &'static str = "DELIMITED";

    fn split_cells(line: &str, delimiter: char) -> Vec<String> {
        if delimiter == ' ' {
            return line.split_whitespace().map(str::to_string).collect();
        }
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .delimiter(delimiter as u8)
            .from_reader(line.as_bytes());
        match reader.records().next() {
            Some(Ok(record)) => record.iter().map(str::to_string).collect(),
            _ => line
                .split(delimiter)
                .map(|cell| cell.trim().to_string())
                .collect(),
        }
    }

    fn best_split(line: &str, candidates: &[char]) -> Option<(char, Vec<String>)> {
        let mut best: Option<(char, Vec<String>)> = None;
        for &candidate in candidates {
            let cells = Self::split_cells(line, candidate);
            if cells.len() > 1 && best.as_ref().map_or(true, |(_, current)| cells.len() > current.len()) {
                best = Some((candidate, cells));
            }
        }
        best
    }

    /// A split settles the delimiter when it names at least two known fields
    /// or is a row of numbers. Free-text preamble lines that happen to contain
    /// a comma do neither.
    fn is_conclusive(cells: &[String]) -> bool {
        let filled: Vec<&str> = cells
            .iter()
            .map(String::as_str)
            .filter(|cell| !cell.is_empty())
            .collect();
        filled.len() >= 2
            && (filled.iter().filter(|cell| matches_any_field(cell)).count() >= 2
                || filled.iter().all(|cell| parse_numeric(cell).is_some()))
    }

    /// Pick the delimiter producing the most fields (>1) on the first
    /// non-empty line. Within the header scan window, a later line whose split
    /// is conclusive overrides an inconclusive one, and lines that split on
    /// nothing (vendor preambles) defer to the next line. Whitespace only
    /// counts when no line in the window splits on a real delimiter.
    fn detect_delimiter(text: &str, options: &IngestOptions) -> Option<char> {
        let window: Vec<&str> = text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .take(options.header_scan_lines.max(1))
            .collect();
        let (whitespace, delimiters) = CANDIDATES.split_last()?;
        let splits: Vec<(char, Vec<String>)> = window
            .iter()
            .filter_map(|line| Self::best_split(line, delimiters))
            .collect();
        splits
            .iter()
            .find(|(_, cells)| Self::is_conclusive(cells))
            .or_else(|| splits.first())
            .map(|(delimiter, _)| *delimiter)
            .or_else(|| {
                window
                    .iter()
                    .find_map(|line| Self::best_split(line, std::slice::from_ref(whitespace)))
                    .map(|(delimiter, _)| delimiter)
            })
    }

    fn looks_binary(text: &str) -> bool {
        let sample: Vec<char> = text.chars().take(4096).collect();
        if sample.is_empty() {
            return false;
        }
        let control = sample
            .iter()
            .filter(|ch| ch.is_control() && !matches!(ch, '\t' | '\r' | '\n'))
            .count();
        control as f64 / sample.len() as f64 > BINARY_CONTROL_RATIO
    }

    fn read_grid(text: &str, delimiter: char) -> Result<Vec<GridRow>, ParserError> {
        if delimiter == ' ' {
            return Ok(text
                .lines()
                .enumerate()
                .map(|(idx, line)| {
                    GridRow::new(
                        idx + 1,
                        line.split_whitespace().map(str::to_string).collect(),
                    )
                })
                .collect());
        }

        // Line numbers are counted from record offsets; csv's own line counter
        // drifts on CRLF input with ragged rows.
        let text = text.replace("\r\n", "\n");
        let bytes = text.as_bytes();
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .delimiter(delimiter as u8)
            .from_reader(bytes);

        let mut grid = Vec::new();
        let mut offset = 0usize;
        let mut line = 1usize;
        for record in reader.records() {
            let record = record.map_err(|err| ParserError::Csv {
                parser: Self::NAME,
                source: err,
            })?;
            let mut start = record
                .position()
                .map_or(offset, |pos| pos.byte() as usize)
                .clamp(offset, bytes.len());
            while bytes.get(start) == Some(&b'\n') {
                start += 1;
            }
            line += bytes[offset..start].iter().filter(|&&byte| byte == b'\n').count();
            offset = start;
            grid.push(GridRow::new(
                line,
                record.iter().map(str::to_string).collect(),
            ));
        }
        Ok(grid)
    }
}

impl FormatParser for DelimitedParser {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn parse(
        &self,
        source: &DecodedSource<'_>,
        options: &IngestOptions,
    ) -> Result<RawTable, ParserError> {
        if source.text.trim().is_empty() {
            return Err(ParserError::FormatMismatch {
                parser: Self::NAME,
                reason: "no text content".to_string(),
            });
        }
        if Self::looks_binary(&source.text) {
            return Err(ParserError::FormatMismatch {
                parser: Self::NAME,
                reason: "content looks binary".to_string(),
            });
        }

        let delimiter =
            Self::detect_delimiter(&source.text, options).ok_or(ParserError::FormatMismatch {
                parser: Self::NAME,
                reason: "no candidate delimiter splits the leading lines into multiple fields"
                    .to_string(),
            })?;
        debug!(file = source.name, delimiter = ?delimiter, "detected delimiter");

        let grid = Self::read_grid(&source.text, delimiter)?;
        table_from_grid(
            Self::NAME,
            SourceFormat::Delimited { delimiter },
            grid,
            options,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_delimiter_with_most_fields() {
        let options = IngestOptions::default();
        assert_eq!(
            DelimitedParser::detect_delimiter("a,b,c\n1,2,3", &options),
            Some(',')
        );
        assert_eq!(
            DelimitedParser::detect_delimiter("Cycle;Voltage;Capacity\n1;4,2;2,5", &options),
            Some(';')
        );
        assert_eq!(
            DelimitedParser::detect_delimiter("Cycle\tVoltage\n1\t4.2", &options),
            Some('\t')
        );
        assert_eq!(
            DelimitedParser::detect_delimiter("Cycle|Voltage|Current\n", &options),
            Some('|')
        );
        assert_eq!(
            DelimitedParser::detect_delimiter("Cycle   Voltage  Current\n", &options),
            Some(' ')
        );
    }

    #[test]
    fn ties_resolve_in_candidate_order() {
        let options = IngestOptions::default();
        assert_eq!(
            DelimitedParser::detect_delimiter("a,b;c", &options),
            Some(',')
        );
    }

    #[test]
    fn preamble_lines_defer_to_the_header() {
        let options = IngestOptions::default();
        let text = "Today's Date 04/15/2024\nProcedure: LFP_cycle.000\nRec#\tCyc#\tVolts\n";
        assert_eq!(DelimitedParser::detect_delimiter(text, &options), Some('\t'));
    }

    #[test]
    fn comma_in_preamble_defers_to_the_header() {
        let options = IngestOptions::default();
        let text = "Date of Test: April 1, 2024\nCell: A1, LFP\nRec#\tCyc#\tVolts\tAmps\n1\t1\t3.40\t1.00\n";
        assert_eq!(DelimitedParser::detect_delimiter(text, &options), Some('\t'));
    }

    #[test]
    fn numeric_row_settles_an_unrecognized_header() {
        let options = IngestOptions::default();
        let text = "alpha,beta;gamma,delta\n1;2;3\n";
        assert_eq!(DelimitedParser::detect_delimiter(text, &options), Some(';'));
    }

    #[test]
    fn single_column_text_is_not_delimited() {
        let options = IngestOptions::default();
        assert_eq!(DelimitedParser::detect_delimiter("hello\nworld", &options), None);
    }

    #[test]
    fn whitespace_grid_collapses_runs() {
        let grid = DelimitedParser::read_grid("Cycle   Voltage\n1    4.2\n", ' ').unwrap();
        assert_eq!(grid[1].cells, vec!["1", "4.2"]);
        assert_eq!(grid[1].line, 2);
    }

    #[test]
    fn crlf_grid_keeps_physical_line_numbers() {
        let text = "Note: x\r\n\r\nCycle\tVoltage\tCurrent\r\n1\t4.2\r\n1\t4.1\t-1.0\r\n";
        let grid = DelimitedParser::read_grid(text, '\t').unwrap();
        let lines: Vec<usize> = grid.iter().map(|row| row.line).collect();
        assert_eq!(lines, vec![1, 3, 4, 5]);
        assert_eq!(grid[1].cells, vec!["Cycle", "Voltage", "Current"]);
        assert_eq!(grid[3].cells, vec!["1", "4.1", "-1.0"]);
    }

    #[test]
    fn binary_noise_is_rejected() {
        let noise: String = (0u8..200).map(|b| (b % 32) as char).collect();
        assert!(DelimitedParser::looks_binary(&noise));
        assert!(!DelimitedParser::looks_binary("Cycle,Voltage\n1,4.2\n"));
    }
}
