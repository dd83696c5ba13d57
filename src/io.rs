//! File readers and writers used by the command-line front end.
//!
//! Paths ending in `.gz` are read and written through flate2; `-` means
//! stdin / stdout where a stream makes sense.

use crate::alignment::Alignment;
use crate::error::{PhyloError, Result};
use crate::newick::parse_newick;
use crate::tree::Tree;
use flate2::Compression;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;

fn is_gz(path: &Path) -> bool {
    path.to_string_lossy().ends_with(".gz")
}

fn is_stdio(path: &Path) -> bool {
    path.as_os_str() == "-"
}

/// Whole contents of a file, stdin for `-`, decompressed if gzipped.
pub fn read_text<P: AsRef<Path>>(path: P) -> Result<String> {
    let p = path.as_ref();
    let mut reader: Box<dyn Read> = if is_stdio(p) {
        Box::new(io::stdin().lock())
    } else if is_gz(p) {
        Box::new(MultiGzDecoder::new(File::open(p)?))
    } else {
        Box::new(File::open(p)?)
    };
    let mut text = String::new();
    reader.read_to_string(&mut text)?;
    Ok(text)
}

/// Parse FASTA text into names and sequences. The name is the first word of
/// the header line; sequence lines are concatenated with whitespace removed.
pub fn parse_fasta(text: &str) -> Result<(Vec<String>, Vec<String>)> {
    let mut names = Vec::new();
    let mut sequences: Vec<String> = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(';') {
            continue;
        }
        if let Some(header) = line.strip_prefix('>') {
            let name = header.split_whitespace().next().unwrap_or_default();
            if name.is_empty() {
                return Err(PhyloError::Validation(format!("FASTA line {}: empty sequence name", lineno + 1)));
            }
            names.push(name.to_string());
            sequences.push(String::new());
        } else {
            let Some(seq) = sequences.last_mut() else {
                return Err(PhyloError::Validation(format!(
                    "FASTA line {}: sequence data before the first header",
                    lineno + 1
                )));
            };
            seq.extend(line.chars().filter(|c| !c.is_whitespace()));
        }
    }
    Ok((names, sequences))
}

/// Read a FASTA alignment (plain, gzipped, or `-` for stdin).
pub fn read_fasta<P: AsRef<Path>>(path: P) -> Result<Alignment> {
    let (names, sequences) = parse_fasta(&read_text(path)?)?;
    Alignment::new(names, sequences)
}

/// Read every tree in a Newick file. Trees end with `;` and may span lines.
pub fn read_newick_file<P: AsRef<Path>>(path: P) -> Result<Vec<Tree>> {
    let text = read_text(path)?;
    text.split_inclusive(';')
        .map(str::trim)
        .filter(|chunk| !chunk.is_empty())
        .map(parse_newick)
        .collect()
}

/// First tree of a Newick file, as text.
pub fn read_first_newick<P: AsRef<Path>>(path: P) -> Result<String> {
    let text = read_text(&path)?;
    text.split_inclusive(';')
        .map(str::trim)
        .find(|chunk| !chunk.is_empty())
        .map(str::to_string)
        .ok_or_else(|| PhyloError::Parse(format!("no tree found in {}", path.as_ref().display())))
}

fn create_writer(p: &Path) -> Result<Box<dyn Write>> {
    Ok(if is_stdio(p) {
        Box::new(BufWriter::new(io::stdout().lock()))
    } else if is_gz(p) {
        Box::new(BufWriter::new(GzEncoder::new(File::create(p)?, Compression::default())))
    } else {
        Box::new(BufWriter::new(File::create(p)?))
    })
}

/// Write a labelled square matrix as TSV.
/// If `path` ends with `.gz`, the output is gzip-compressed; `-` writes to stdout.
pub fn write_matrix_tsv<P: AsRef<Path>, T: std::fmt::Display>(path: P, names: &[String], mat: &[Vec<T>]) -> Result<()> {
    if names.len() != mat.len() {
        return Err(PhyloError::Validation(format!("{} names for {} matrix rows", names.len(), mat.len())));
    }
    let mut out = create_writer(path.as_ref())?;

    // Header row
    write!(&mut out, "\t")?;
    writeln!(&mut out, "{}", names.join("\t"))?;

    for (name, row) in names.iter().zip(mat) {
        write!(&mut out, "{name}")?;
        for val in row {
            write!(&mut out, "\t{val}")?;
        }
        writeln!(&mut out)?;
    }

    out.flush()?;
    Ok(())
}

/// Write text (JSON reports, Newick) followed by a newline.
pub fn write_text<P: AsRef<Path>>(path: P, text: &str) -> Result<()> {
    let mut out = create_writer(path.as_ref())?;
    writeln!(&mut out, "{text}")?;
    out.flush()?;
    Ok(())
}
