use std::env;
use std::fs;

use orbgen::basis::build::{build_raw, build_reduced};
use orbgen::basis::radial::coeff_normalized2raw;
use orbgen::dataset::read_orb_mat;
use orbgen::guess::initgen;
use orbgen::input::Input;
use orbgen::nesting::{merge, Coef};
use orbgen::orbio::write_orb;
use orbgen::spillage::Spillage;

fn main() {
    env_logger::init();

    // -------------------------------------------------
    // 1. Parse CLI
    // -------------------------------------------------
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage:");
        eprintln!("  orbgen input.yaml");
        std::process::exit(1);
    }

    // -------------------------------------------------
    // 2. Read input file
    // -------------------------------------------------
    let input_text = fs::read_to_string(&args[1]).expect("Cannot read input file");
    let input = Input::from_yaml(&input_text).expect("Invalid input file");

    // -------------------------------------------------
    // 3. Single-atom reference -> initial guess
    // -------------------------------------------------
    let monomer = read_orb_mat(&input.monomer).expect("Cannot parse the monomer dataset");
    let nzeta_full = input
        .levels
        .last()
        .expect("validated: at least one level")
        .nzeta
        .clone();

    let coef_full = initgen(
        &nzeta_full,
        input.ecut,
        monomer.lmax[0],
        monomer.rcut,
        monomer.nbes,
        &monomer.mo_jy,
        &monomer.wk,
        input.reduced,
    )
    .expect("Initial guess failed");

    println!(
        "Initial guess ready: nzeta = {:?}, rcut = {}",
        nzeta_full, monomer.rcut
    );

    // -------------------------------------------------
    // 4. Load reference configurations
    // -------------------------------------------------
    let mut engine = Spillage::new(input.reduced);
    for conf in &input.configs {
        engine
            .add_pw(&conf.overlap, &conf.operator, input.weights)
            .expect("Cannot load configuration pair");
    }
    println!("{} configurations loaded", engine.nconf());

    // -------------------------------------------------
    // 5. Level-by-level spillage minimization
    // -------------------------------------------------
    let iconfs: Vec<usize> = (0..engine.nconf()).collect();
    let mut prev = vec![0usize; nzeta_full.len()];
    let mut coef_tot: Option<Coef> = None;

    for (ilevel, level) in input.levels.iter().enumerate() {
        println!("Optimizing level {}...", ilevel + 1);

        // this level optimizes the zeta tiers added on top of the
        // previous (frozen) ones
        let coef_init: Coef = vec![coef_full
            .iter()
            .enumerate()
            .map(|(l, c)| {
                let n_prev = prev.get(l).copied().unwrap_or(0);
                let n_now = level.nzeta.get(l).copied().unwrap_or(0);
                c.rows(n_prev, n_now.saturating_sub(n_prev)).into_owned()
            })
            .collect()];

        let coef_lvl = engine
            .opt(
                &coef_init,
                coef_tot.as_ref(),
                &iconfs,
                &[0..level.nbands],
                &input.options,
                input.nthreads,
            )
            .expect("Optimization failed");

        coef_tot = Some(match coef_tot {
            None => coef_lvl,
            Some(sofar) => merge(&sofar, &coef_lvl, 2).expect("Cannot merge zeta tiers"),
        });
        prev = level.nzeta.clone();
    }

    let coef_tot = coef_tot.expect("validated: at least one level");

    // -------------------------------------------------
    // 6. Tabulate and write the orbital file
    // -------------------------------------------------
    let rcut = monomer.rcut;
    let ngrid = (rcut / input.dr).round() as usize + 1;
    let r: Vec<f64> = (0..ngrid).map(|i| i as f64 * input.dr).collect();

    let chi = if input.reduced {
        build_reduced(&coef_tot[0], rcut, &r, true)
    } else {
        let raw = coeff_normalized2raw(&coef_tot[0], rcut).expect("Coefficient conversion failed");
        build_raw(&raw, rcut, &r, true)
    }
    .expect("Cannot tabulate orbitals");

    let mut file = fs::File::create(&input.output).expect("Cannot create output file");
    write_orb(&mut file, &input.element, input.ecut, rcut, &chi, input.dr)
        .expect("Cannot write orbital file");

    println!("Orbitals written to {}", input.output.display());
}
