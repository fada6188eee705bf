use depot_acquire::run_method;
use depot_methods::sqv::SqvMethod;

fn main() {
    depot_methods::init_logging();
    std::process::exit(run_method(SqvMethod::capabilities(), &mut SqvMethod));
}
