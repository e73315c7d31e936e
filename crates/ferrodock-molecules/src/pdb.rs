//! Fixed-column PDB coordinate records.
//!
//! Only `ATOM`/`HETATM` records of the first model are read. Alternate
//! locations other than blank or `A` are dropped so each atom appears once.

use crate::element::Element;
use crate::error::{MoleculeError, Result};
use nalgebra::Vector3;
use std::fmt;
use std::str::FromStr;

/// One coordinate record.
#[derive(Debug, Clone, PartialEq)]
pub struct PdbAtom {
    pub serial: u32,
    pub name: String,
    pub alt_loc: char,
    pub res_name: String,
    pub chain_id: char,
    pub res_seq: i32,
    pub insertion_code: char,
    pub position: Vector3<f64>,
    pub occupancy: f64,
    pub b_factor: f64,
    pub element: Option<Element>,
    pub formal_charge: i8,
    pub hetero: bool,
}

impl PdbAtom {
    pub fn is_hydrogen(&self) -> bool {
        self.element == Some(Element::H)
    }

    pub fn is_water(&self) -> bool {
        matches!(self.res_name.as_str(), "HOH" | "WAT" | "H2O" | "DOD" | "TIP" | "TIP3" | "SOL")
    }
}

/// Parsed structure: the retained atoms of the first model, in file order.
#[derive(Debug, Clone, Default)]
pub struct Structure {
    pub atoms: Vec<PdbAtom>,
}

impl Structure {
    pub fn parse(text: &str) -> Result<Self> {
        let mut atoms = Vec::new();
        let mut seen_model = false;

        for (index, line) in text.lines().enumerate() {
            let record = line.get(..6).unwrap_or(line).trim_end();
            match record {
                "MODEL" => {
                    if seen_model {
                        break;
                    }
                    seen_model = true;
                }
                "ENDMDL" => break,
                "ATOM" | "HETATM" => {
                    let atom = parse_atom_line(line, record == "HETATM")
                        .map_err(|reason| MoleculeError::StructureParse(format!("line {}: {reason}", index + 1)))?;
                    if matches!(atom.alt_loc, ' ' | 'A') {
                        atoms.push(atom);
                    }
                }
                _ => {}
            }
        }

        Ok(Self { atoms })
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    pub fn positions(&self) -> Vec<Vector3<f64>> {
        self.atoms.iter().map(|a| a.position).collect()
    }

    /// Atoms belonging to the selected residues (and chain, when given).
    pub fn select<'a>(&'a self, selection: &'a ResidueSelection) -> impl Iterator<Item = &'a PdbAtom> + 'a {
        self.atoms.iter().filter(move |a| selection.matches(a))
    }
}

fn column(line: &str, start: usize, end: usize) -> &str {
    let end = end.min(line.len());
    if start >= end {
        return "";
    }
    line.get(start..end).unwrap_or("")
}

fn char_at(line: &str, index: usize) -> char {
    line.as_bytes().get(index).map(|b| *b as char).unwrap_or(' ')
}

fn parse_float(line: &str, start: usize, end: usize, field: &str) -> std::result::Result<f64, String> {
    let raw = column(line, start, end).trim();
    raw.parse::<f64>()
        .map_err(|_| format!("invalid {field} '{raw}'"))
}

fn parse_atom_line(line: &str, hetero: bool) -> std::result::Result<PdbAtom, String> {
    if line.len() < 54 {
        return Err(format!("coordinate record too short ({} columns)", line.len()));
    }

    let name_field = column(line, 12, 16);
    let res_name = column(line, 17, 20).trim().to_string();
    let element = infer_element(column(line, 76, 78), name_field, hetero);

    Ok(PdbAtom {
        serial: column(line, 6, 11).trim().parse().unwrap_or(0),
        name: name_field.trim().to_string(),
        alt_loc: char_at(line, 16),
        res_name,
        chain_id: char_at(line, 21),
        res_seq: column(line, 22, 26)
            .trim()
            .parse()
            .map_err(|_| format!("invalid residue number '{}'", column(line, 22, 26).trim()))?,
        insertion_code: char_at(line, 26),
        position: Vector3::new(
            parse_float(line, 30, 38, "x")?,
            parse_float(line, 38, 46, "y")?,
            parse_float(line, 46, 54, "z")?,
        ),
        occupancy: parse_float(line, 54, 60, "occupancy").unwrap_or(1.0),
        b_factor: parse_float(line, 60, 66, "b-factor").unwrap_or(0.0),
        element,
        formal_charge: parse_charge(column(line, 78, 80)),
        hetero,
    })
}

fn infer_element(element_field: &str, name_field: &str, hetero: bool) -> Option<Element> {
    if let Some(element) = Element::from_symbol(element_field) {
        return Some(element);
    }

    let name: String = name_field.chars().filter(|c| c.is_ascii_alphabetic()).collect();
    if name.is_empty() {
        return None;
    }
    // Two-letter symbols occupy columns 13-14; one-letter symbols are right-justified.
    let left_aligned = !name_field.starts_with(' ') && !name_field.starts_with(|c: char| c.is_ascii_digit());
    if hetero && left_aligned && name.len() >= 2 {
        if let Some(element) = Element::from_symbol(&name[..2]) {
            return Some(element);
        }
    }
    Element::from_symbol(&name[..1])
}

/// Formal charge column, e.g. `2+` or `1-`.
fn parse_charge(field: &str) -> i8 {
    let field = field.trim();
    if field.len() != 2 {
        return 0;
    }
    let magnitude = field[..1].parse::<i8>().unwrap_or(0);
    match &field[1..] {
        "+" => magnitude,
        "-" => -magnitude,
        _ => 0,
    }
}

/// A set of residues, optionally restricted to one chain.
///
/// Textual form: `A:12,45,78` or `12,45,78`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResidueSelection {
    pub chain: Option<char>,
    pub residues: Vec<i32>,
}

impl ResidueSelection {
    pub fn new(chain: Option<char>, residues: Vec<i32>) -> Self {
        Self { chain, residues }
    }

    pub fn matches(&self, atom: &PdbAtom) -> bool {
        if let Some(chain) = self.chain {
            if atom.chain_id != chain {
                return false;
            }
        }
        self.residues.contains(&atom.res_seq)
    }
}

impl FromStr for ResidueSelection {
    type Err = MoleculeError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (chain, list) = match s.split_once(':') {
            Some((chain, list)) => {
                let mut chars = chain.trim().chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => (Some(c), list),
                    _ => {
                        return Err(MoleculeError::StructureParse(format!(
                            "invalid chain id in residue selection '{s}'"
                        )))
                    }
                }
            }
            None => (None, s),
        };

        let residues = list
            .split(',')
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(|r| {
                r.parse::<i32>().map_err(|_| {
                    MoleculeError::StructureParse(format!("invalid residue number '{r}' in selection"))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { chain, residues })
    }
}

impl fmt::Display for ResidueSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(chain) = self.chain {
            write!(f, "{chain}:")?;
        }
        let list: Vec<String> = self.residues.iter().map(|r| r.to_string()).collect();
        f.write_str(&list.join(","))
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::MINI_PROTEIN;
    use super::*;

    #[test]
    fn test_parse_fixed_columns() {
        let structure = Structure::parse(MINI_PROTEIN).unwrap();
        assert_eq!(structure.atoms.len(), 18);

        let ca = &structure.atoms[1];
        assert_eq!(ca.name, "CA");
        assert_eq!(ca.res_name, "ALA");
        assert_eq!(ca.chain_id, 'A');
        assert_eq!(ca.res_seq, 1);
        assert_eq!(ca.element, Some(Element::C));
        assert!((ca.position.x - 11.639).abs() < 1e-9);

        let zn = &structure.atoms[15];
        assert!(zn.hetero);
        assert_eq!(zn.element, Some(Element::Zn));
        assert_eq!(zn.formal_charge, 2);
        assert!(structure.atoms[16].is_water());
    }

    #[test]
    fn test_only_first_model_and_primary_altloc() {
        let text = "\
MODEL        1
ATOM      1  CA AALA A   1       1.000   1.000   1.000  0.50  0.00           C
ATOM      2  CA BALA A   1       1.200   1.000   1.000  0.50  0.00           C
ENDMDL
MODEL        2
ATOM      1  CA  ALA A   1       9.000   9.000   9.000  1.00  0.00           C
ENDMDL
";
        let structure = Structure::parse(text).unwrap();
        assert_eq!(structure.atoms.len(), 1);
        assert_eq!(structure.atoms[0].position.x, 1.0);
    }

    #[test]
    fn test_bad_coordinate_is_an_error() {
        let text = "ATOM      1  CA  ALA A   1       abc     1.000   1.000  1.00  0.00           C\n";
        let err = Structure::parse(text).unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn test_element_inferred_from_name() {
        let text = "HETATM    1 FE   HEM A   1       0.000   0.000   0.000  1.00  0.00\n\
                    ATOM      2  NZ  LYS A   2       1.000   0.000   0.000  1.00  0.00\n";
        let structure = Structure::parse(text).unwrap();
        assert_eq!(structure.atoms[0].element, Some(Element::Fe));
        assert_eq!(structure.atoms[1].element, Some(Element::N));
    }

    #[test]
    fn test_residue_selection_parsing() {
        let sel: ResidueSelection = "A:12, 45,78".parse().unwrap();
        assert_eq!(sel.chain, Some('A'));
        assert_eq!(sel.residues, vec![12, 45, 78]);
        assert_eq!(sel.to_string(), "A:12,45,78");

        let sel: ResidueSelection = "3".parse().unwrap();
        assert_eq!(sel.chain, None);
        assert!("AB:1".parse::<ResidueSelection>().is_err());
        assert!("A:x".parse::<ResidueSelection>().is_err());
    }
}
