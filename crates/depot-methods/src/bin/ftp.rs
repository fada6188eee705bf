use depot_acquire::run_method;
use depot_methods::ftp::FtpMethod;

fn main() {
    depot_methods::init_logging();
    let mut method = FtpMethod::new();
    std::process::exit(run_method(FtpMethod::capabilities(), &mut method));
}
