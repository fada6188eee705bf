use depot_acquire::run_method;
use depot_methods::mirror::MirrorMethod;

fn main() {
    depot_methods::init_logging();
    let mut method = MirrorMethod::new();
    std::process::exit(run_method(MirrorMethod::capabilities(), &mut method));
}
