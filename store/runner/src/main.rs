use clap::{App, Arg};
use flux::logging;
use hematite::config::ServerConfig;
use hematite::server::{EventLoop, Server};
use nix::unistd::{dup2, fork, setsid, ForkResult};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::process;

#[global_allocator]
static ALLOC: hematite::alloc::CountingAlloc = hematite::alloc::CountingAlloc;

const PIDFILE: &str = "/var/run/redis.pid";

/// Detach from the controlling terminal: fork (the parent exits), start a
/// fresh session, point stdio at /dev/null and drop the pid file. With
/// `logfile stdout` configured a daemonized server logs nowhere at all.
fn daemonize() {
    match unsafe { fork() } {
        Ok(ForkResult::Parent { .. }) => process::exit(0),
        Ok(ForkResult::Child) => {}
        Err(_) => process::exit(1),
    }
    let _ = setsid();

    if let Ok(devnull) = OpenOptions::new().read(true).write(true).open("/dev/null") {
        let fd = devnull.as_raw_fd();
        let _ = dup2(fd, 0);
        let _ = dup2(fd, 1);
        let _ = dup2(fd, 2);
    }

    if let Ok(mut pidfile) = File::create(PIDFILE) {
        let _ = writeln!(pidfile, "{}", process::id());
    }
}

fn main() {
    let matches = App::new("Hematite Server")
        .version(hematite::VERSION)
        .author("Bush Hammer Industries")
        .about("Runs the hematite key/value server.")
        .arg(Arg::with_name("CONFIG_FILE").help("Path to the config file"))
        .get_matches();

    let mut cfg = ServerConfig::default();
    if let Some(path) = matches.value_of("CONFIG_FILE") {
        // The built-in save points make way for whatever the file says.
        cfg.reset_save_params();
        if let Err(error) = cfg.load(path) {
            eprintln!("\n*** FATAL CONFIG FILE ERROR ***");
            eprintln!("Reading the configuration file, at line {}", error.line);
            eprintln!("{}", error.message);
            process::exit(1);
        }
    }

    if cfg.daemonize {
        daemonize();
    }

    let log = match logging::init(cfg.loglevel, cfg.logfile.as_deref()) {
        Ok(log) => log,
        Err(error) => {
            eprintln!("Can't set up logging: {}", error);
            process::exit(1);
        }
    };

    let mut el = match EventLoop::new() {
        Ok(el) => el,
        Err(error) => {
            logging::warn!(log, "creating the event loop failed"; "error" => %error);
            process::exit(1);
        }
    };

    let mut server = match Server::new(cfg, log.clone()) {
        Ok(server) => server,
        Err(error) => {
            logging::warn!(log, "opening TCP port failed"; "error" => %error);
            process::exit(1);
        }
    };
    logging::info!(log, "server started"; "version" => hematite::VERSION);

    match server.load_db() {
        Ok(true) => logging::info!(log, "DB loaded from disk"),
        Ok(false) => {}
        Err(error) => {
            logging::warn!(log, "error loading the DB, aborting"; "error" => %error);
            process::exit(1);
        }
    }

    if let Err(error) = server.install(&mut el) {
        logging::warn!(log, "registering server events failed"; "error" => %error);
        process::exit(1);
    }

    let port = server.cfg.port;
    logging::info!(log, "the server is now ready to accept connections"; "port" => port);
    el.run(&mut server);
}
