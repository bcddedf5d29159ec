//! Container image tagging, build and push

use chrono::NaiveDateTime;
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::info;

use crate::core::errors::Result;
use crate::core::models::{ImageRef, ModelName};
use crate::core::process::{CommandRunner, CommandSpec};

/// Timestamp layout hashed into image tags
pub const TAG_TIME_FORMAT: &str = "%Y_%m_%dT%H_%M_%S%.9f";

/// Hex SHA-256 of the formatted timestamp
pub fn generate_tag(now: NaiveDateTime) -> String {
    let stamp = now.format(TAG_TIME_FORMAT).to_string();
    format!("{:x}", Sha256::digest(stamp.as_bytes()))
}

/// `docker build <context> --tag=<image> --build-arg model_name=<model>`
pub fn build_command(image: &ImageRef, model: &ModelName, context: &Path) -> CommandSpec {
    CommandSpec::new("docker").args([
        "build".to_string(),
        context.display().to_string(),
        format!("--tag={}", image),
        "--build-arg".to_string(),
        format!("model_name={}", model),
    ])
}

/// `docker push <image>`
pub fn push_command(image: &ImageRef) -> CommandSpec {
    CommandSpec::new("docker").args(["push", image.as_str()])
}

/// Build the image from `context` and push it
pub async fn build_and_push(
    runner: &dyn CommandRunner,
    image: &ImageRef,
    model: &ModelName,
    context: &Path,
) -> Result<()> {
    info!("Building {} image...", model);
    runner.run_checked(&build_command(image, model, context)).await?;

    info!("Pushing {}...", image);
    runner.run_checked(&push_command(image)).await?;

    info!("Pushed {}", image);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(nanos: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_nano_opt(14, 5, 7, nanos)
            .unwrap()
    }

    #[test]
    fn test_tag_is_sha256_hex() {
        let tag = generate_tag(at(0));
        assert_eq!(tag.len(), 64);
        assert!(tag.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(tag, generate_tag(at(0)));
    }

    #[test]
    fn test_tags_differ_within_one_second() {
        assert_ne!(generate_tag(at(1_000)), generate_tag(at(2_000)));
    }

    #[test]
    fn test_docker_commands() {
        let model = ModelName::new("opus-mt-de-en").unwrap();
        let image = ImageRef::new("europe-docker.pkg.dev/proj/serving", &model, "abc");

        let build = build_command(&image, &model, Path::new("."));
        assert_eq!(
            build.to_string(),
            "docker build . --tag=europe-docker.pkg.dev/proj/serving/opus-mt-de-en:abc --build-arg model_name=opus-mt-de-en"
        );
        assert_eq!(
            push_command(&image).args,
            vec!["push", "europe-docker.pkg.dev/proj/serving/opus-mt-de-en:abc"]
        );
    }
}
