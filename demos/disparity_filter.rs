extern crate image;
use disparity_filter::core::*;
use disparity_filter::error::Result;
use disparity_filter::utils;
use disparity_filter::{PipelineOption, StereoPipeline};

use std::path::PathBuf;

use log::{debug, error, info};

const USAGE: &str =
    "usage: disparity_filter <left> <right> [--filter=wls_conf|wls_no_conf] [--no-downscale] [--out=DIR]";

struct Args {
    left: PathBuf,
    right: PathBuf,
    filter: FilterMode,
    no_downscale: bool,
    out: PathBuf,
}

fn parse_args() -> Result<Option<Args>> {
    let mut positional = Vec::new();
    let mut filter = FilterMode::WlsConf;
    let mut no_downscale = false;
    let mut out = PathBuf::from("output");
    for arg in std::env::args().skip(1) {
        if let Some(name) = arg.strip_prefix("--filter=") {
            filter = name.parse()?;
        } else if arg == "--no-downscale" {
            no_downscale = true;
        } else if let Some(dir) = arg.strip_prefix("--out=") {
            out = PathBuf::from(dir);
        } else {
            positional.push(PathBuf::from(arg));
        }
    }
    if positional.len() != 2 {
        return Ok(None);
    }
    let right = positional.pop();
    let left = positional.pop();
    Ok(left.zip(right).map(|(left, right)| Args {
        left,
        right,
        filter,
        no_downscale,
        out,
    }))
}

fn run(args: Args) -> Result<()> {
    let limg = image::open(&args.left)?.to_rgb8();
    let rimg = image::open(&args.right)?.to_rgb8();

    let option = PipelineOption::new(args.filter)
        .set_no_downscale(args.no_downscale)
        .build();
    let output = StereoPipeline::new(option).run(&limg, &rimg)?;
    info!("Matching time:  {}ms", output.matching_ms());
    info!("Filtering time: {}ms", output.filtering_ms());

    let sw = stopwatch::Stopwatch::start_new();
    std::fs::create_dir_all(&args.out)?;
    let vis_mult = *option.vis_mult();
    let raw_vis = output.raw().disparity().to_visualization(vis_mult);
    let filtered_vis = output.filtered().to_visualization(vis_mult);
    let conf_map = output.confidence().to_image();
    let saves = vec![
        ("disparity_raw.png", raw_vis.save(args.out.join("disparity_raw.png"))),
        (
            "disparity_filtered.png",
            filtered_vis.save(args.out.join("disparity_filtered.png")),
        ),
        ("conf_map.png", conf_map.save(args.out.join("conf_map.png"))),
        ("left_image.png", limg.save(args.out.join("left_image.png"))),
    ];
    for (name, result) in saves {
        if let Err(e) = result {
            error!("cannot save {}: {}", name, e);
        }
    }
    if let Some(sharpness) = utils::to_disparity_image(&output.raw().sharpness().view()) {
        if let Err(e) = sharpness.save(args.out.join("sharpness.png")) {
            error!("cannot save sharpness.png: {}", e);
        }
    }
    debug!(
        "[demo] save images to {:?}. roi: {:?}, elapse time: {}ms",
        args.out,
        output.roi(),
        sw.elapsed_ms()
    );
    Ok(())
}

pub fn main() {
    // 初始化日志
    utils::init_log("debug");
    match parse_args() {
        Ok(Some(args)) => {
            if let Err(e) = run(args) {
                error!("{}", e);
                std::process::exit(1);
            }
        }
        Ok(None) => {
            println!("{}", USAGE);
            std::process::exit(1);
        }
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    }
}
