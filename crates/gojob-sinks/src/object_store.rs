use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::{Client, Config};

/// A parsed `s3://bucket/key?region=...&endpoint=...&access_key=...&secret_key=...` URL.
///
/// The bucket is taken from the URL host and the key from the URL path, per
/// the path-scheme table; `region`/`endpoint`/`access_key`/`secret_key` are
/// query parameters.
#[derive(Debug, Clone)]
pub struct ObjectStoreUrl {
    pub bucket: String,
    pub key: String,
    pub region: String,
    pub endpoint: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
}

const DEFAULT_ENDPOINT: &str = "s3.amazonaws.com";
const DEFAULT_REGION: &str = "us-east-1";

impl ObjectStoreUrl {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let url = url::Url::parse(raw)?;
        if url.scheme() != "s3" {
            anyhow::bail!("not an s3:// url: {raw}");
        }
        let bucket = url
            .host_str()
            .ok_or_else(|| anyhow::anyhow!("s3 url missing bucket (host): {raw}"))?
            .to_string();
        let key = url.path().trim_start_matches('/').to_string();
        if key.is_empty() {
            anyhow::bail!("s3 url missing key (path): {raw}");
        }

        let mut region = DEFAULT_REGION.to_string();
        let mut endpoint = DEFAULT_ENDPOINT.to_string();
        let mut access_key = None;
        let mut secret_key = None;
        for (k, v) in url.query_pairs() {
            match k.as_ref() {
                "region" => region = v.into_owned(),
                "endpoint" => endpoint = v.into_owned(),
                "access_key" => access_key = Some(v.into_owned()),
                "secret_key" => secret_key = Some(v.into_owned()),
                _ => {}
            }
        }

        Ok(Self {
            bucket,
            key,
            region,
            endpoint,
            access_key,
            secret_key,
        })
    }

    fn client(&self) -> Client {
        let endpoint_url = if self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://") {
            self.endpoint.clone()
        } else {
            format!("https://{}", self.endpoint)
        };

        let mut builder = Config::builder()
            .region(Region::new(self.region.clone()))
            .endpoint_url(endpoint_url)
            .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest());

        if let (Some(access), Some(secret)) = (&self.access_key, &self.secret_key) {
            builder = builder.credentials_provider(Credentials::new(
                access.clone(),
                secret.clone(),
                None,
                None,
                "gojob-static",
            ));
        }

        Client::from_conf(builder.build())
    }

    /// Uploads the local file at `staged_path` to this object, then removes it.
    pub async fn upload_staged(&self, staged_path: &std::path::Path) -> anyhow::Result<()> {
        let client = self.client();
        let body = ByteStream::from_path(staged_path).await?;
        client
            .put_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .body(body)
            .send()
            .await?;
        tokio::fs::remove_file(staged_path).await.ok();
        Ok(())
    }

    /// Downloads this object into `dest_path`, creating parent directories as needed.
    pub async fn download_to(&self, dest_path: &std::path::Path) -> anyhow::Result<()> {
        if let Some(dir) = dest_path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let client = self.client();
        let mut obj = client
            .get_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .send()
            .await?;

        let mut file = tokio::fs::File::create(dest_path).await?;
        use tokio::io::AsyncWriteExt;
        while let Some(chunk) = obj.body.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        Ok(())
    }
}
