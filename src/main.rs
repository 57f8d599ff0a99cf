// SPDX-License-Identifier: Apache-2.0

use anyhow::Context;
use log::error;

use starttls_auditor::server::ProxyServer;
use starttls_auditor::{logging, opts};

fn main() -> anyhow::Result<()> {
    let Some(proc_args) = opts::parse_clap().context("failed to parse command line options")?
    else {
        return Ok(());
    };

    logging::init_process_logger(proc_args.verbose_level);

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;

    let ret = rt.block_on(run(proc_args));

    match ret {
        Ok(code) => std::process::exit(code as i32),
        Err(e) => {
            error!("{e:?}");
            Err(e)
        }
    }
}

async fn run(proc_args: opts::ProcArgs) -> anyhow::Result<u8> {
    let server = ProxyServer::new(
        proc_args.listen,
        proc_args.remote,
        &proc_args.key_path,
        &proc_args.vectors,
    )
    .context("failed to initialize proxy server")?;

    server.run().await
}
