//! Utility function to find the domain file of a problem based on naming conventions.

use std::path::{Path, PathBuf};

use regex::Regex;

use crate::errors::{Ctx, Message, Res};

/// Attempts to find the corresponding domain file for the given PDDL problem.
/// This method will look for a file named `domain.pddl` in the
/// current and parent folders, as well as a few other usual names derived from the problem's name.
pub fn find_domain_of(problem_file: &Path) -> Res<PathBuf> {
    // these are the domain file names that we will look for in the current and parent directory
    let mut candidate_domain_files: Vec<PathBuf> = Vec::with_capacity(4);

    candidate_domain_files.push(match problem_file.extension() {
        Some(ext) => Path::new("domain").with_extension(ext),
        None => Path::new("domain.pddl").to_path_buf(),
    });

    let problem_filename = problem_file
        .file_name()
        .title("Invalid file")?
        .to_str()
        .title("Could not convert file name to utf8")?;

    // XXXXX.pb.pddl -> XXXXX.dom.pddl
    let re = Regex::new("^(.+)\\.pb\\.(pddl)$")?;
    for m in re.captures_iter(problem_filename) {
        candidate_domain_files.push(format!("{}.dom.{}", &m[1], &m[2]).into());
    }
    // XXXXX.pddl -> XXXXX-domain.pddl, domain-XXXXX.pddl, domain_XXXXX.pddl
    let re = Regex::new("^(.+)\\.(pddl)$")?;
    for m in re.captures_iter(problem_filename) {
        candidate_domain_files.push(format!("{}-domain.{}", &m[1], &m[2]).into());
        candidate_domain_files.push(format!("domain-{}.{}", &m[1], &m[2]).into());
        candidate_domain_files.push(format!("domain_{}.{}", &m[1], &m[2]).into());
    }
    // pNN.pddl -> dNN.pddl
    let re = Regex::new("^p([0-9]+)\\.(pddl)$")?;
    for m in re.captures_iter(problem_filename) {
        candidate_domain_files.push(format!("d{}.{}", &m[1], &m[2]).into());
    }
    // instance-NN.pddl -> domain-NN.pddl
    let re = Regex::new("^instance-([0-9]+)\\.(pddl)$")?;
    for m in re.captures_iter(problem_filename) {
        candidate_domain_files.push(format!("domain-{}.{}", &m[1], &m[2]).into());
    }

    // directories where to look for the domain
    let mut candidate_directories = Vec::with_capacity(3);
    if let Some(curr) = problem_file.parent() {
        candidate_directories.push(curr.to_owned());
        if let Some(parent) = curr.parent() {
            candidate_directories.push(parent.to_owned());
            candidate_directories.push(parent.join("domains"));
        }
    }

    for f in &candidate_domain_files {
        for dir in &candidate_directories {
            let candidate = dir.join(f);
            if candidate.exists() {
                return Ok(candidate);
            }
        }
    }
    Err(Message::error(format!(
        "Could not find a corresponding domain file in same or parent directory as the problem file. Candidates: {candidate_domain_files:?}"
    )))
}
