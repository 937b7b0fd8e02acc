/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

use anyhow::Context;
use stitch_codecs::{Coordinator, FrameWriter, OutputTarget, StitchReport};
use tracing::info;

use crate::cli_args::Opt;

/// Opens both inputs, runs the coordinator to completion and returns its report.
pub fn stitch(opt: &Opt) -> anyhow::Result<StitchReport> {
    let target = OutputTarget::parse(&opt.output_template)?;
    let config = opt.stitch_config();

    info!(
        "Decoding {} and {} as {}",
        opt.input1.display(),
        opt.input2.display(),
        config.codec
    );
    let coordinator = Coordinator::open(&opt.input1, &opt.input2, &config)
        .context("failed to set up the decode sessions")?;

    let mut writer = FrameWriter::new(target, opt.format);
    let report = coordinator.run(&mut writer)?;
    info!(
        "Wrote {} {} files after {} rounds",
        writer.written(),
        opt.format,
        report.rounds
    );
    Ok(report)
}
