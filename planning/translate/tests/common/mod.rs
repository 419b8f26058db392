use std::path::PathBuf;

use aries_translate::errors::{Message, TranslateError};
use aries_translate::limits::Budget;
use aries_translate::options::TranslateOptions;
use aries_translate::pddl::input::Input;
use aries_translate::translate::{Outcome, translate};

pub fn problem_dir(name: &str) -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests/problems");
    path.push(name);
    path
}

pub fn translate_with(name: &str, options: &TranslateOptions) -> Result<Outcome, TranslateError> {
    let dir = problem_dir(name);
    let domain = Input::from_file(&dir.join("domain.pddl")).map_err(Message::from)?;
    let problem = Input::from_file(&dir.join("problem.pddl")).map_err(Message::from)?;
    translate(domain, problem, options, &Budget::unlimited())
}

pub fn translate_fixture(name: &str) -> Result<Outcome, TranslateError> {
    translate_with(name, &TranslateOptions::default())
}
