//! Mock pet-store REST API.
//!
//! Seeded with four pets and two owners. Reads are open; creating, updating
//! and deleting pets require `Authorization: Bearer <TEST_TOKEN>`.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use tokio::task::JoinHandle;

/// Bearer token the mutating endpoints accept.
pub const TEST_TOKEN: &str = "test-secret-123";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Pet {
    pub id: u64,
    pub name: String,
    pub status: String,
    pub tag: Option<String>,
    pub owner_id: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Owner {
    pub id: u64,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Deserialize)]
struct PetCreate {
    name: String,
    #[serde(default = "default_status")]
    status: String,
    tag: Option<String>,
    owner_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct PetUpdate {
    name: Option<String>,
    status: Option<String>,
    tag: Option<String>,
    owner_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    limit: Option<usize>,
    status: Option<String>,
}

fn default_status() -> String {
    "active".to_string()
}

const STATUSES: &[&str] = &["active", "adopted", "pending"];

#[derive(Debug)]
struct Store {
    pets: BTreeMap<u64, Pet>,
    owners: BTreeMap<u64, Owner>,
    next_id: u64,
}

impl Store {
    fn seeded() -> Self {
        let pet = |id, name: &str, status: &str, tag: &str, owner_id| Pet {
            id,
            name: name.to_string(),
            status: status.to_string(),
            tag: Some(tag.to_string()),
            owner_id,
        };
        let pets = [
            pet(1, "Fido", "active", "dog", Some(1)),
            pet(2, "Whiskers", "adopted", "cat", Some(1)),
            pet(3, "Buddy", "active", "dog", Some(2)),
            pet(4, "Luna", "pending", "cat", None),
        ];
        let owners = [
            Owner {
                id: 1,
                name: "Alice".to_string(),
                email: "alice@example.com".to_string(),
            },
            Owner {
                id: 2,
                name: "Bob".to_string(),
                email: "bob@example.com".to_string(),
            },
        ];
        Self {
            pets: pets.into_iter().map(|p| (p.id, p)).collect(),
            owners: owners.into_iter().map(|o| (o.id, o)).collect(),
            next_id: 5,
        }
    }
}

type Shared = Arc<Mutex<Store>>;

fn lock(store: &Shared) -> MutexGuard<'_, Store> {
    store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn detail(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "detail": message }))).into_response()
}

fn authorized(headers: &HeaderMap) -> Result<(), Response> {
    let expected = format!("Bearer {TEST_TOKEN}");
    match headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        Some(value) if value == expected => Ok(()),
        _ => Err(detail(StatusCode::UNAUTHORIZED, "Unauthorized")),
    }
}

fn check_status(status: &str) -> Result<(), Response> {
    if STATUSES.contains(&status) {
        Ok(())
    } else {
        Err(detail(StatusCode::UNPROCESSABLE_ENTITY, "invalid status"))
    }
}

async fn list_pets(State(store): State<Shared>, Query(query): Query<ListQuery>) -> Response {
    let store = lock(&store);
    let matching: Vec<&Pet> = store
        .pets
        .values()
        .filter(|p| query.status.as_deref().is_none_or(|s| p.status == s))
        .collect();
    let total = matching.len();
    let items: Vec<&Pet> = matching
        .into_iter()
        .take(query.limit.unwrap_or(usize::MAX))
        .collect();
    Json(json!({ "items": items, "total": total })).into_response()
}

async fn create_pet(
    State(store): State<Shared>,
    headers: HeaderMap,
    Json(input): Json<PetCreate>,
) -> Response {
    if let Err(rejection) = authorized(&headers).and_then(|()| check_status(&input.status)) {
        return rejection;
    }
    let mut store = lock(&store);
    let id = store.next_id;
    store.next_id += 1;
    let pet = Pet {
        id,
        name: input.name,
        status: input.status,
        tag: input.tag,
        owner_id: input.owner_id,
    };
    store.pets.insert(id, pet.clone());
    (StatusCode::CREATED, Json(pet)).into_response()
}

async fn get_pet(State(store): State<Shared>, Path(pet_id): Path<u64>) -> Response {
    match lock(&store).pets.get(&pet_id) {
        Some(pet) => Json(pet.clone()).into_response(),
        None => detail(StatusCode::NOT_FOUND, "Pet not found"),
    }
}

async fn update_pet(
    State(store): State<Shared>,
    headers: HeaderMap,
    Path(pet_id): Path<u64>,
    Json(input): Json<PetUpdate>,
) -> Response {
    if let Err(rejection) = authorized(&headers) {
        return rejection;
    }
    if let Some(Err(rejection)) = input.status.as_deref().map(check_status) {
        return rejection;
    }
    let mut store = lock(&store);
    let Some(pet) = store.pets.get_mut(&pet_id) else {
        return detail(StatusCode::NOT_FOUND, "Pet not found");
    };
    if let Some(name) = input.name {
        pet.name = name;
    }
    if let Some(status) = input.status {
        pet.status = status;
    }
    if input.tag.is_some() {
        pet.tag = input.tag;
    }
    if input.owner_id.is_some() {
        pet.owner_id = input.owner_id;
    }
    Json(pet.clone()).into_response()
}

async fn delete_pet(
    State(store): State<Shared>,
    headers: HeaderMap,
    Path(pet_id): Path<u64>,
) -> Response {
    if let Err(rejection) = authorized(&headers) {
        return rejection;
    }
    match lock(&store).pets.remove(&pet_id) {
        Some(_) => StatusCode::NO_CONTENT.into_response(),
        None => detail(StatusCode::NOT_FOUND, "Pet not found"),
    }
}

async fn get_owner(State(store): State<Shared>, Path(owner_id): Path<u64>) -> Response {
    match lock(&store).owners.get(&owner_id) {
        Some(owner) => Json(owner.clone()).into_response(),
        None => detail(StatusCode::NOT_FOUND, "Owner not found"),
    }
}

async fn list_owner_pets(State(store): State<Shared>, Path(owner_id): Path<u64>) -> Response {
    let store = lock(&store);
    if !store.owners.contains_key(&owner_id) {
        return detail(StatusCode::NOT_FOUND, "Owner not found");
    }
    let pets: Vec<&Pet> = store
        .pets
        .values()
        .filter(|p| p.owner_id == Some(owner_id))
        .collect();
    Json(json!(pets)).into_response()
}

fn router() -> Router {
    Router::new()
        .route("/pets", get(list_pets).post(create_pet))
        .route("/pets/{pet_id}", get(get_pet).patch(update_pet).delete(delete_pet))
        .route("/owners/{owner_id}", get(get_owner))
        .route("/owners/{owner_id}/pets", get(list_owner_pets))
        .with_state(Arc::new(Mutex::new(Store::seeded())))
}

/// A running pet API. The server stops when this is dropped.
#[derive(Debug)]
pub struct PetApi {
    pub addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl PetApi {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// OpenAPI document whose server URL points at this instance.
    pub fn document(&self) -> JsonValue {
        pet_api_document(&self.base_url())
    }
}

impl Drop for PetApi {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Serve a freshly seeded pet API on `127.0.0.1:0`.
pub async fn spawn_pet_api() -> Result<PetApi> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .context("failed to bind pet API listener")?;
    let addr = listener.local_addr().context("pet API listener has no address")?;
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router()).await {
            tracing::warn!(error = %e, "pet API server stopped");
        }
    });
    Ok(PetApi { addr, handle })
}

/// The pet API's OpenAPI 3 document.
pub fn pet_api_document(base_url: &str) -> JsonValue {
    let pet_id = json!({
        "name": "pet_id", "in": "path", "required": true,
        "description": "Pet identifier",
        "schema": { "type": "integer" }
    });
    let owner_id = json!({
        "name": "owner_id", "in": "path", "required": true,
        "description": "Owner identifier",
        "schema": { "type": "integer" }
    });
    let json_body = |schema: &str| {
        json!({
            "required": true,
            "content": { "application/json": { "schema": { "$ref": format!("#/components/schemas/{schema}") } } }
        })
    };
    let json_response = |schema: JsonValue| {
        json!({ "description": "OK", "content": { "application/json": { "schema": schema } } })
    };
    let schema_ref = |name: &str| json!({ "$ref": format!("#/components/schemas/{name}") });
    let status = || json!({ "type": "string", "enum": STATUSES });

    json!({
        "openapi": "3.0.3",
        "info": {
            "title": "Pet Store",
            "description": "A small pet store for scriptgate tests",
            "version": "1.0.0"
        },
        "servers": [{ "url": base_url }],
        "paths": {
            "/pets": {
                "get": {
                    "operationId": "list_pets",
                    "summary": "List all pets",
                    "tags": ["pets"],
                    "parameters": [
                        { "name": "limit", "in": "query", "description": "Maximum number of pets to return",
                          "schema": { "type": "integer" } },
                        { "name": "status", "in": "query", "description": "Filter by status",
                          "schema": status() }
                    ],
                    "responses": { "200": json_response(schema_ref("PetList")) }
                },
                "post": {
                    "operationId": "create_pet",
                    "summary": "Create a pet",
                    "tags": ["pets"],
                    "requestBody": json_body("PetCreate"),
                    "responses": { "201": json_response(schema_ref("Pet")) }
                }
            },
            "/pets/{pet_id}": {
                "parameters": [pet_id],
                "get": {
                    "operationId": "get_pet",
                    "summary": "Get a pet by ID",
                    "tags": ["pets"],
                    "responses": { "200": json_response(schema_ref("Pet")) }
                },
                "patch": {
                    "operationId": "update_pet",
                    "summary": "Update a pet",
                    "tags": ["pets"],
                    "requestBody": json_body("PetUpdate"),
                    "responses": { "200": json_response(schema_ref("Pet")) }
                },
                "delete": {
                    "operationId": "delete_pet",
                    "summary": "Delete a pet",
                    "tags": ["pets"],
                    "responses": { "204": { "description": "Deleted" } }
                }
            },
            "/owners/{owner_id}": {
                "get": {
                    "operationId": "get_owner",
                    "summary": "Get an owner by ID",
                    "tags": ["owners"],
                    "parameters": [owner_id.clone()],
                    "responses": { "200": json_response(schema_ref("Owner")) }
                }
            },
            "/owners/{owner_id}/pets": {
                "get": {
                    "operationId": "list_owner_pets",
                    "summary": "List pets belonging to an owner",
                    "tags": ["owners", "pets"],
                    "parameters": [owner_id],
                    "responses": { "200": json_response(json!({ "type": "array", "items": schema_ref("Pet") })) }
                }
            }
        },
        "components": {
            "securitySchemes": {
                "bearerAuth": { "type": "http", "scheme": "bearer" }
            },
            "schemas": {
                "Pet": {
                    "type": "object",
                    "description": "A pet in the store",
                    "required": ["id", "name", "status"],
                    "properties": {
                        "id": { "type": "integer" },
                        "name": { "type": "string", "description": "Pet name" },
                        "status": status(),
                        "tag": { "type": "string", "nullable": true },
                        "owner_id": { "type": "integer", "nullable": true }
                    }
                },
                "PetCreate": {
                    "type": "object",
                    "required": ["name"],
                    "properties": {
                        "name": { "type": "string" },
                        "status": status(),
                        "tag": { "type": "string" },
                        "owner_id": { "type": "integer" }
                    }
                },
                "PetUpdate": {
                    "type": "object",
                    "properties": {
                        "name": { "type": "string" },
                        "status": status(),
                        "tag": { "type": "string" },
                        "owner_id": { "type": "integer" }
                    }
                },
                "PetList": {
                    "type": "object",
                    "required": ["items", "total"],
                    "properties": {
                        "items": { "type": "array", "items": schema_ref("Pet") },
                        "total": { "type": "integer" }
                    }
                },
                "Owner": {
                    "type": "object",
                    "required": ["id", "name", "email"],
                    "properties": {
                        "id": { "type": "integer" },
                        "name": { "type": "string" },
                        "email": { "type": "string" }
                    }
                }
            }
        }
    })
}
