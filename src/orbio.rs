//! Plaintext orbital-file output.
//!
//! Header stanza (element, cutoffs, zeta counts, mesh) followed by one
//! block of tabulated chi(r) values per (l, zeta).

use std::io::Write;

use crate::error::Result;

const ORBITAL_LETTERS: [char; 7] = ['S', 'P', 'D', 'F', 'G', 'H', 'I'];

/// Write tabulated orbitals `chi[l][zeta][ir]` on a uniform grid of
/// spacing `dr`.
pub fn write_orb<W: Write>(
    w: &mut W,
    element: &str,
    ecut: f64,
    rcut: f64,
    chi: &[Vec<Vec<f64>>],
    dr: f64,
) -> Result<()> {
    let lmax = chi.len().saturating_sub(1);
    let mesh = chi
        .iter()
        .flat_map(|chi_l| chi_l.iter().map(Vec::len))
        .max()
        .unwrap_or(0);

    let bar = "-".repeat(75);
    writeln!(w, "{bar}")?;
    writeln!(w, "Element                     {element}")?;
    writeln!(w, "Energy Cutoff(Ry)           {ecut}")?;
    writeln!(w, "Radius Cutoff(a.u.)         {rcut}")?;
    writeln!(w, "Lmax                        {lmax}")?;
    for (l, chi_l) in chi.iter().enumerate() {
        let letter = ORBITAL_LETTERS.get(l).copied().unwrap_or('X');
        writeln!(w, "Number of {letter}orbital-->       {}", chi_l.len())?;
    }
    writeln!(w, "{bar}")?;
    writeln!(w, "SUMMARY  END\n")?;
    writeln!(w, "Mesh                        {mesh}")?;
    writeln!(w, "dr                          {dr}")?;

    for (l, chi_l) in chi.iter().enumerate() {
        for (zeta, chi_z) in chi_l.iter().enumerate() {
            writeln!(
                w,
                "{:>20}{:>20}{:>20}",
                "Type", "L", "N"
            )?;
            writeln!(w, "{:>20}{:>20}{:>20}", 0, l, zeta)?;
            for row in chi_z.chunks(4) {
                let line: Vec<String> = row.iter().map(|v| format!("{v:>21.14e}")).collect();
                writeln!(w, "{}", line.join(" "))?;
            }
        }
    }
    Ok(())
}
