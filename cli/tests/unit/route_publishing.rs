//! Publishing routes into a routing directory on disk.

#![allow(clippy::unwrap_used)]

use spotdeploy_cli::application::services::routing::{
    PublishOutcome, Unpublished, publish, unpublish,
};
use spotdeploy_cli::domain::identity::WorkspaceIdentity;
use spotdeploy_cli::domain::network::static_ip;
use spotdeploy_cli::domain::routing::{parse_route_file, route_file_owner};
use spotdeploy_cli::infra::routes::FileRouteStore;
use spotdeploy_common::{RoutingEntry, ServicePorts};
use tempfile::TempDir;

const DOMAIN: &str = "apps.example.com";

fn published(outcome: PublishOutcome) -> (Vec<RoutingEntry>, Vec<String>) {
    match outcome {
        PublishOutcome::Published { entries, removed } => (entries, removed),
        PublishOutcome::Refused { owner } => panic!("refused, owned by {owner}"),
    }
}

#[tokio::test]
async fn alice_blog_web_is_published_at_its_fixed_address() {
    let dir = TempDir::new().unwrap();
    let routes = FileRouteStore::new(dir.path().to_path_buf());
    let id = WorkspaceIdentity::new("alice", "blog");
    let ip = static_ip(&id.vm_name(), "10.0.0.0/24", 10).unwrap().to_string();
    let ports = ServicePorts::from([("web".to_string(), vec![8080])]);

    let (entries, removed) = published(publish(&routes, DOMAIN, &id, &ip, &ports).await.unwrap());
    assert!(removed.is_empty());
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].hostname, "blog-web.apps.example.com");
    assert_eq!(entries[0].backend, format!("{ip}:8080"));

    let contents = std::fs::read_to_string(dir.path().join("blog.toml")).unwrap();
    assert_eq!(route_file_owner(&contents), Some("alice/blog"));
    let config = parse_route_file(&contents).unwrap();
    assert_eq!(config.hostnames(), ["blog-web.apps.example.com"]);
    let router = &config.http.routers["blog-web"];
    assert_eq!(router.entry_points, ["websecure"]);
    assert_eq!(router.tls.cert_resolver, "letsencrypt");
    assert_eq!(
        config.http.services["blog-web"].load_balancer.servers[0].url,
        format!("http://{ip}:8080")
    );
}

#[tokio::test]
async fn redeploy_with_fewer_ports_drops_the_stale_hostnames() {
    let dir = TempDir::new().unwrap();
    let routes = FileRouteStore::new(dir.path().to_path_buf());
    let id = WorkspaceIdentity::new("alice", "blog");
    let first = ServicePorts::from([
        ("web".to_string(), vec![8080]),
        ("api".to_string(), vec![3000, 3001]),
    ]);
    let (entries, _) =
        published(publish(&routes, DOMAIN, &id, "10.0.0.142", &first).await.unwrap());
    let names: Vec<&str> = entries.iter().map(|e| e.service_name.as_str()).collect();
    assert_eq!(names, ["blog-api1", "blog-api2", "blog-web"]);

    let second = ServicePorts::from([("web".to_string(), vec![8080])]);
    let (_, removed) =
        published(publish(&routes, DOMAIN, &id, "10.0.0.142", &second).await.unwrap());
    let mut removed = removed;
    removed.sort();
    assert_eq!(
        removed,
        ["blog-api1.apps.example.com", "blog-api2.apps.example.com"]
    );
    let contents = std::fs::read_to_string(dir.path().join("blog.toml")).unwrap();
    assert!(!contents.contains("blog-api1"));
}

#[tokio::test]
async fn another_tenants_routes_are_left_alone() {
    let dir = TempDir::new().unwrap();
    let routes = FileRouteStore::new(dir.path().to_path_buf());
    let ports = ServicePorts::from([("web".to_string(), vec![80])]);
    let alice = WorkspaceIdentity::new("alice", "blog");
    let bob = WorkspaceIdentity::new("bob", "blog");

    published(publish(&routes, DOMAIN, &alice, "10.0.0.20", &ports).await.unwrap());
    let outcome = publish(&routes, DOMAIN, &bob, "10.0.0.30", &ports).await.unwrap();
    assert_eq!(
        outcome,
        PublishOutcome::Refused {
            owner: "alice/blog".into()
        }
    );
    assert_eq!(
        unpublish(&routes, &bob).await.unwrap(),
        Unpublished::Refused {
            owner: "alice/blog".into()
        }
    );
    assert_eq!(unpublish(&routes, &alice).await.unwrap(), Unpublished::Removed);
    assert_eq!(unpublish(&routes, &alice).await.unwrap(), Unpublished::Absent);
    assert!(!dir.path().join("blog.toml").exists());
}

#[tokio::test]
async fn owner_match_ignores_case() {
    let dir = TempDir::new().unwrap();
    let routes = FileRouteStore::new(dir.path().to_path_buf());
    let ports = ServicePorts::from([("web".to_string(), vec![80])]);
    published(
        publish(&routes, DOMAIN, &WorkspaceIdentity::new("Alice", "Blog"), "10.0.0.20", &ports)
            .await
            .unwrap(),
    );
    published(
        publish(&routes, DOMAIN, &WorkspaceIdentity::new("alice", "blog"), "10.0.0.20", &ports)
            .await
            .unwrap(),
    );
}
