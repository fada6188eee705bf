use depot_acquire::run_method;
use depot_methods::copy::CopyMethod;

fn main() {
    depot_methods::init_logging();
    std::process::exit(run_method(CopyMethod::capabilities(), &mut CopyMethod));
}
