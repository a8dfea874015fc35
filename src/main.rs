use std::env;
use std::sync::Arc;
use std::process::ExitCode;

use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use metatype::bootstrap;
use metatype::convert::{Pattern, Range, Required};
use metatype::{
    DictionaryStore, EngineConfig, ErrorRecorder, Field, Getter, Recorder, Result, Setter, SimpleKind, TypeFactory,
    Validator,
};

fn run() -> Result<()> {
    let dictionary = DictionaryStore::root().new_dictionary(Some("catalog"))?;
    let factory = TypeFactory::with_dictionary(dictionary.clone());

    let address: Arc<dyn Validator> = Arc::new(Pattern::new(r"[^@\s]+@[^@\s]+")?);
    let lifespan: Arc<dyn Validator> = Arc::new(Range::new(Some(0.0), Some(150.0)));
    let required: Arc<dyn Validator> = Arc::new(Required);
    let email = factory.add_validators(&factory.simple(SimpleKind::String), vec![address]);
    let age = factory.add_validators(&factory.simple(SimpleKind::Integer), vec![lifespan]);
    let name = factory.add_validators(&factory.simple(SimpleKind::String), vec![required]);
    let person = factory.register(
        "Person",
        factory.declare_struct(vec![
            Field::new("name", name),
            Field::new("age", age),
            Field::new("email", email),
            Field::new("born", factory.builtin("Date")?),
            Field::new("status", factory.declare_enumeration(["active", "retired"])?),
            Field::new("friends", factory.declare_list(factory.declare_reference("Person")?)?),
        ])?,
    )?;

    let ada = person.new_object();
    let mut recorder = ErrorRecorder::new();
    let updated = ada.set_string_data(
        [
            ("name", "Ada"),
            ("age", "36"),
            ("email", "ada@example.org"),
            ("born", "1815-12-10T00:00:00.000Z"),
            ("friends[0].name", "Charles"),
            ("friends[0].age", "two hundred"),
        ],
        &mut recorder,
    )?;
    for (path, message) in recorder.reports() {
        error!(path = %path, "{}", message);
    }
    let ada = updated.unwrap_or(ada);
    info!(value = %ada, "built a person");

    recorder.clear();
    ada.validate(&mut recorder)?;
    info!(errors = recorder.error_count(None), "validated");

    let state = bootstrap::populate_type_state(&person.resolve()?)?;
    println!("{}", state);
    let restored = factory.restore_from_state_object(&state)?;
    info!(equal = (restored == person), "restored the Person type from its state");

    let dictionary_state = bootstrap::populate_dictionary_state(&dictionary)?;
    println!("{}", dictionary_state);
    Ok(())
}

fn main() -> ExitCode {
    let path = env::args().nth(1);
    let settings = match EngineConfig::load(path.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log_filter));
    if let Err(e) = fmt().with_env_filter(filter).try_init() {
        eprintln!("logging is unavailable: {}", e);
    }
    metatype::settings::install(settings);

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
