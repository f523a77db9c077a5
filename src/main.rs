use clap::{Arg, ArgAction, Command};
use clap_num::maybe_hex;
use prettytable::{Cell, Row, Table};
use std::process;

// Import our modules/crates.
use exhume_body::Body;
use exhume_lvm::{Handle, LogicalVolume, VolumeGroup};

fn main() {
    // Set up Clap command-line argument parsing.
    let matches = Command::new("exhume_lvm")
        .version("0.2.0")
        .author("ForensicXlab")
        .about("Exhumes and displays LVM2 volume group information")
        .arg(
            Arg::new("body")
                .short('b')
                .long("body")
                .value_parser(clap::value_parser!(String))
                .required(true)
                .help("Path to the partition body file"),
        )
        .arg(
            Arg::new("format")
                .short('f')
                .long("format")
                .value_parser(clap::value_parser!(String))
                .required(true)
                .help("File format: either 'raw' or 'ewf'"),
        )
        .arg(
            Arg::new("offset")
                .short('o')
                .long("offset")
                .value_parser(maybe_hex::<u64>)
                .required(true)
                .help("LVM partition starts at address 0x..."),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Enable verbose output"),
        )
        .get_matches();

    env_logger::init();

    // Retrieve the argument values.
    let body_path = matches.get_one::<String>("body").unwrap();
    let format = matches.get_one::<String>("format").unwrap();
    let offset = *matches.get_one::<u64>("offset").unwrap();
    let verbose = *matches.get_one::<bool>("verbose").unwrap_or(&false);

    // Open the "body" using exhume_body. The descriptor body is also the
    // only physical volume we can read from in this single-file workflow,
    // so it doubles as the sole source passed to `attach_physical_volumes`.
    let mut body = Body::new_from(body_path.clone(), format, Some(offset));
    if verbose {
        body.print_info();
    }

    let mut handle = match Handle::open(body) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Error opening LVM volume group: {:?}", e);
            process::exit(1);
        }
    };

    // No other physical volume sources are available from a single body
    // file; attaching an empty list still unlocks logical volume reads for
    // whichever logical volumes are fully backed by the descriptor's PV.
    if let Err(e) = handle.attach_physical_volumes::<Body>(Vec::new()) {
        eprintln!("Error attaching physical volumes: {:?}", e);
        process::exit(1);
    }

    let vg = match handle.volume_group() {
        Ok(vg) => vg.clone(),
        Err(e) => {
            eprintln!("Error reading volume group: {:?}", e);
            process::exit(1);
        }
    };
    print_vg_info(&vg);

    let lv = match vg.lvs().next() {
        Some(lv) => lv,
        None => {
            eprintln!("No logical volumes found in the volume group");
            process::exit(1);
        }
    };
    println!("Attempting to open logical volume '{}'", lv.name);

    match handle.open_lv(&lv.name) {
        Ok(mut cursor) => {
            let mut buf = [0u8; 512];
            match cursor.read(&mut buf) {
                Ok(n) => println!("Read {} bytes from the start of '{}'", n, lv.name),
                Err(e) => eprintln!("Error reading logical volume '{}': {:?}", lv.name, e),
            }
        }
        Err(e) => eprintln!("Error opening logical volume '{}': {:?}", lv.name, e),
    }
}

/// Display all volume group, physical volume and logical volume details in
/// one big table.
fn print_vg_info(vg: &VolumeGroup) {
    let mut table = Table::new();

    table.add_row(Row::new(vec![
        Cell::new("Physical Volume"),
        Cell::new("Volume Group"),
        Cell::new("Logical Volume"),
        Cell::new("Segment"),
    ]));

    let vg_info = format!(
        "Name: {}\nID: {}\nSeqno: {}\nExtent Size: {}",
        vg.name, vg.id, vg.seqno, vg.extent_size
    );

    for pv in vg.pvs() {
        let pv_info = format!(
            "Name: {}\nID: {}\nDevice: {}\nSize: {}",
            pv.name, pv.id, pv.device_path, pv.size
        );

        let lvs_on_pv: Vec<&LogicalVolume> = vg
            .lvs()
            .filter(|lv| {
                lv.segments
                    .iter()
                    .any(|seg| seg.stripes.iter().any(|s| s.pv_name == pv.name))
            })
            .collect();

        if lvs_on_pv.is_empty() {
            table.add_row(Row::new(vec![
                Cell::new(&pv_info),
                Cell::new(&vg_info),
                Cell::new("-"),
                Cell::new("No logical volumes"),
            ]));
            continue;
        }

        for lv in lvs_on_pv {
            let lv_info = format!("Name: {}\nID: {}\nSize: {}", lv.name, lv.id, lv.size);
            if lv.segments.is_empty() {
                table.add_row(Row::new(vec![
                    Cell::new(&pv_info),
                    Cell::new(&vg_info),
                    Cell::new(&lv_info),
                    Cell::new(
                        lv.unsupported_segment_type
                            .as_deref()
                            .unwrap_or("No segments"),
                    ),
                ]));
            } else {
                for seg in &lv.segments {
                    let seg_info = format!(
                        "Start: {}\nSize: {}\nType: {}\nStripe Size: {}\nStripes: {}",
                        seg.start,
                        seg.size,
                        seg.segment_type,
                        seg.stripe_size,
                        seg.stripes.len()
                    );
                    table.add_row(Row::new(vec![
                        Cell::new(&pv_info),
                        Cell::new(&vg_info),
                        Cell::new(&lv_info),
                        Cell::new(&seg_info),
                    ]));
                }
            }
        }
    }

    table.printstd();
}
