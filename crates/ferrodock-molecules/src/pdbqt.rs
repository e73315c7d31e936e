//! Charge-annotated atom records (PDBQT) and AutoDock atom typing.

use crate::element::Element;
use nalgebra::Vector3;

/// Local chemistry needed to pick an AutoDock atom type.
#[derive(Debug, Clone, Copy, Default)]
pub struct TypingContext {
    pub aromatic: bool,
    pub attached_hydrogens: usize,
    pub heavy_neighbors: usize,
    /// Nitrogen whose lone pair is delocalised (amide, aniline, pyrrole-type).
    pub delocalized: bool,
    /// Hydrogen bonded to N, O or S.
    pub polar_hydrogen: bool,
}

/// AutoDock 4 atom type for `element` in context.
pub fn autodock_type(element: Element, ctx: &TypingContext) -> &'static str {
    match element {
        Element::H if ctx.polar_hydrogen => "HD",
        Element::H => "H",
        Element::C if ctx.aromatic => "A",
        Element::C => "C",
        Element::N => {
            let blocked = ctx.attached_hydrogens > 0
                || ctx.delocalized
                || ctx.heavy_neighbors >= 4
                || (ctx.aromatic && ctx.heavy_neighbors >= 3);
            if blocked {
                "N"
            } else {
                "NA"
            }
        }
        Element::O => "OA",
        Element::S if ctx.heavy_neighbors + ctx.attached_hydrogens <= 2 => "SA",
        Element::S => "S",
        Element::Se => "S",
        Element::B => "C",
        other => other.symbol(),
    }
}

/// One ATOM/HETATM record with charge and type columns.
#[derive(Debug, Clone, PartialEq)]
pub struct PdbqtAtom {
    pub hetero: bool,
    pub serial: usize,
    pub name: String,
    pub element: Element,
    pub res_name: String,
    pub chain_id: char,
    pub res_seq: i32,
    pub insertion_code: char,
    pub position: Vector3<f64>,
    pub occupancy: f64,
    pub b_factor: f64,
    pub charge: f64,
    pub ad_type: String,
}

impl PdbqtAtom {
    /// Render in fixed columns; charge in 71-76, type in 78-79.
    pub fn to_line(&self) -> String {
        let record = if self.hetero { "HETATM" } else { "ATOM" };
        format!(
            "{:<6}{:>5} {}{}{:>3} {}{:>4}{}   {:>8.3}{:>8.3}{:>8.3}{:>6.2}{:>6.2}    {:>6.3} {:<2}",
            record,
            self.serial % 100_000,
            format_atom_name(&self.name, self.element),
            ' ',
            truncate(&self.res_name, 3),
            self.chain_id,
            self.res_seq,
            self.insertion_code,
            self.position.x,
            self.position.y,
            self.position.z,
            self.occupancy,
            self.b_factor,
            self.charge,
            self.ad_type,
        )
    }
}

fn truncate(s: &str, width: usize) -> &str {
    match s.char_indices().nth(width) {
        Some((end, _)) => &s[..end],
        None => s,
    }
}

/// PDB atom-name alignment: one-letter elements start in column 14.
pub fn format_atom_name(name: &str, element: Element) -> String {
    let name = truncate(name, 4);
    if name.len() < 4 && element.symbol().len() == 1 {
        format!(" {name:<3}")
    } else {
        format!("{name:<4}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atom() -> PdbqtAtom {
        PdbqtAtom {
            hetero: false,
            serial: 7,
            name: "CA".to_string(),
            element: Element::C,
            res_name: "SER".to_string(),
            chain_id: 'A',
            res_seq: 2,
            insertion_code: ' ',
            position: Vector3::new(15.242, 6.362, -4.025),
            occupancy: 1.0,
            b_factor: 0.0,
            charge: 0.107,
            ad_type: "C".to_string(),
        }
    }

    #[test]
    fn test_line_columns() {
        let line = atom().to_line();
        assert_eq!(&line[0..6], "ATOM  ");
        assert_eq!(&line[6..11], "    7");
        assert_eq!(&line[12..16], " CA ");
        assert_eq!(&line[17..20], "SER");
        assert_eq!(&line[21..22], "A");
        assert_eq!(&line[22..26], "   2");
        assert_eq!(&line[30..38], "  15.242");
        assert_eq!(&line[46..54], "  -4.025");
        assert_eq!(&line[70..76], " 0.107");
        assert_eq!(line[77..].trim_end(), "C");
    }

    #[test]
    fn test_two_letter_element_name_alignment() {
        assert_eq!(format_atom_name("ZN", Element::Zn), "ZN  ");
        assert_eq!(format_atom_name("OG1", Element::O), " OG1");
        assert_eq!(format_atom_name("HD21", Element::H), "HD21");
    }

    #[test]
    fn test_autodock_types() {
        let polar = TypingContext { polar_hydrogen: true, ..Default::default() };
        assert_eq!(autodock_type(Element::H, &polar), "HD");
        assert_eq!(autodock_type(Element::H, &TypingContext::default()), "H");

        let aromatic = TypingContext { aromatic: true, ..Default::default() };
        assert_eq!(autodock_type(Element::C, &aromatic), "A");

        let pyridine_n = TypingContext { aromatic: true, heavy_neighbors: 2, ..Default::default() };
        assert_eq!(autodock_type(Element::N, &pyridine_n), "NA");
        let amine_nh = TypingContext { attached_hydrogens: 2, heavy_neighbors: 1, ..Default::default() };
        assert_eq!(autodock_type(Element::N, &amine_nh), "N");

        assert_eq!(autodock_type(Element::O, &TypingContext::default()), "OA");
        assert_eq!(autodock_type(Element::Zn, &TypingContext::default()), "Zn");
        assert_eq!(autodock_type(Element::Cl, &TypingContext::default()), "Cl");
    }
}
