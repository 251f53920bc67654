//! Services of the `shopping_list` domain

use std::future::Future;
use std::sync::{Arc, Weak};

use ha_core::{ServiceCall, SupportsResponse};
use ha_service_registry::{ServiceDescription, ServiceError};
use serde_json::json;
use tracing::{error, info};

use super::component::ShoppingList;
use super::error::ShoppingListResult;
use super::*;

fn name_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "name": {"type": "string", "minLength": 1}
        },
        "required": ["name"]
    })
}

fn empty_schema() -> serde_json::Value {
    json!({"type": "object"})
}

type Response = ShoppingListResult<Option<serde_json::Value>>;

/// Register one service whose handler borrows the list for the call
fn register_service<F, Fut>(list: &Arc<ShoppingList>, description: ServiceDescription, handler: F)
where
    F: Fn(Arc<ShoppingList>, ServiceCall) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    let weak: Weak<ShoppingList> = Arc::downgrade(list);
    let handler = Arc::new(handler);
    list.services
        .register_with_description(description, move |call: ServiceCall| {
            let weak = weak.clone();
            let handler = handler.clone();
            async move {
                let Some(list) = weak.upgrade() else {
                    return Err(ServiceError::CallFailed("shopping list is gone".into()));
                };
                let service_id = call.service_id();
                handler(list, call).await.map_err(|err| {
                    error!("{} failed: {}", service_id, err);
                    ServiceError::from(err)
                })
            }
        });
}

fn name_of(call: &ServiceCall) -> String {
    call.get_str(ATTR_NAME).unwrap_or_default().to_string()
}

async fn add_item(list: Arc<ShoppingList>, call: ServiceCall) -> Response {
    list.add_item(&name_of(&call), &call.context).await?;
    Ok(None)
}

async fn remove_item(list: Arc<ShoppingList>, call: ServiceCall) -> Response {
    list.remove_by_name(&name_of(&call), &call.context).await?;
    Ok(None)
}

async fn complete_item(list: Arc<ShoppingList>, call: ServiceCall) -> Response {
    list.set_complete_by_name(&name_of(&call), true, &call.context).await?;
    Ok(None)
}

async fn incomplete_item(list: Arc<ShoppingList>, call: ServiceCall) -> Response {
    list.set_complete_by_name(&name_of(&call), false, &call.context).await?;
    Ok(None)
}

async fn complete_all(list: Arc<ShoppingList>, call: ServiceCall) -> Response {
    list.set_all(true, &call.context).await?;
    Ok(None)
}

async fn incomplete_all(list: Arc<ShoppingList>, call: ServiceCall) -> Response {
    list.set_all(false, &call.context).await?;
    Ok(None)
}

async fn clear_completed_items(list: Arc<ShoppingList>, call: ServiceCall) -> Response {
    list.clear_completed(&call.context).await?;
    Ok(None)
}

async fn grosh_sync(list: Arc<ShoppingList>, call: ServiceCall) -> Response {
    let items = list.sync(&call.context).await?;
    Ok(Some(json!({ "items": items })))
}

async fn grosh_select_list(list: Arc<ShoppingList>, call: ServiceCall) -> Response {
    let household = list.select_list(&name_of(&call), &call.context).await?;
    Ok(Some(json!({ "list": household })))
}

/// Register every `shopping_list` service
pub(crate) fn register(list: &Arc<ShoppingList>) {
    let with_name = |service: &str, description: &str| {
        ServiceDescription::new(DOMAIN, service)
            .with_description(description)
            .with_schema(name_schema())
    };
    let without_data = |service: &str, description: &str| {
        ServiceDescription::new(DOMAIN, service)
            .with_description(description)
            .with_schema(empty_schema())
    };

    register_service(list, with_name(SERVICE_ADD_ITEM, "Add an item to the shopping list"), add_item);
    register_service(
        list,
        with_name(SERVICE_REMOVE_ITEM, "Remove the first item with the given name"),
        remove_item,
    );
    register_service(
        list,
        with_name(SERVICE_COMPLETE_ITEM, "Mark the first item with the given name as completed"),
        complete_item,
    );
    register_service(
        list,
        with_name(SERVICE_INCOMPLETE_ITEM, "Mark the first item with the given name as incomplete"),
        incomplete_item,
    );
    register_service(list, without_data(SERVICE_COMPLETE_ALL, "Mark all items as completed"), complete_all);
    register_service(
        list,
        without_data(SERVICE_INCOMPLETE_ALL, "Mark all items as incomplete"),
        incomplete_all,
    );
    register_service(
        list,
        without_data(SERVICE_CLEAR_COMPLETED_ITEMS, "Remove completed items from the list"),
        clear_completed_items,
    );
    register_service(
        list,
        without_data(SERVICE_GROSH_SYNC, "Pull the selected Grosh list into the shopping list")
            .with_response(SupportsResponse::Optional),
        grosh_sync,
    );
    register_service(
        list,
        with_name(
            SERVICE_GROSH_SELECT_LIST,
            "Select the Grosh list to synchronize with, by name or id",
        )
        .with_response(SupportsResponse::Optional),
        grosh_select_list,
    );

    info!("Shopping list services registered");
}

#[cfg(test)]
mod tests {
    use crate::shopping_list::mock::setup_loaded;
    use super::*;
    use ha_core::Context;

    #[tokio::test]
    async fn test_all_services_registered() {
        let (_dir, _mock, list) = setup_loaded(Some("7")).await;

        let services = list.services.domain_services(DOMAIN);
        let names: Vec<_> = services.iter().map(|s| s.service.as_str()).collect();
        assert_eq!(
            names,
            vec![
                SERVICE_ADD_ITEM,
                SERVICE_CLEAR_COMPLETED_ITEMS,
                SERVICE_COMPLETE_ALL,
                SERVICE_COMPLETE_ITEM,
                SERVICE_GROSH_SELECT_LIST,
                SERVICE_GROSH_SYNC,
                SERVICE_INCOMPLETE_ALL,
                SERVICE_INCOMPLETE_ITEM,
                SERVICE_REMOVE_ITEM,
            ]
        );
    }

    #[tokio::test]
    async fn test_add_then_complete_by_name() {
        let (_dir, mock, list) = setup_loaded(Some("7")).await;

        list.services
            .call(DOMAIN, SERVICE_ADD_ITEM, json!({"name": "Milk"}), Context::new(), false)
            .await
            .unwrap();
        list.services
            .call(DOMAIN, SERVICE_COMPLETE_ITEM, json!({"name": "milk"}), Context::new(), false)
            .await
            .unwrap();

        let items = list.items().await.unwrap();
        assert!(items[0].complete);
        assert_eq!(mock.mutations(), vec!["add 7 g-milk", "bought 7 entry-1"]);
    }

    #[tokio::test]
    async fn test_unknown_name_is_invalid_data() {
        let (_dir, mock, list) = setup_loaded(Some("7")).await;

        let err = list
            .services
            .call(DOMAIN, SERVICE_REMOVE_ITEM, json!({"name": "Caviar"}), Context::new(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidData(_)));
        assert!(mock.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_missing_name_rejected_by_schema() {
        let (_dir, _mock, list) = setup_loaded(Some("7")).await;

        let err = list
            .services
            .call(DOMAIN, SERVICE_ADD_ITEM, json!({}), Context::new(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidData(_)));
    }

    #[tokio::test]
    async fn test_grosh_sync_returns_items() {
        let (_dir, mock, list) = setup_loaded(Some("7")).await;
        mock.set_remote(
            "7",
            vec![ha_grosh::RemoteItem {
                id: "e1".into(),
                name: "Bread".into(),
                grocery_id: "g-bread".into(),
                amount: None,
                bought: true,
            }],
        );

        let response = list
            .services
            .call(DOMAIN, SERVICE_GROSH_SYNC, serde_json::Value::Null, Context::new(), true)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response["items"][0]["name"], "Bread");
        assert_eq!(response["items"][0]["complete"], true);
    }

    #[tokio::test]
    async fn test_complete_and_incomplete_all() {
        let (_dir, mock, list) = setup_loaded(Some("7")).await;
        let ctx = Context::new();
        list.add_item("Milk", &ctx).await.unwrap();
        list.add_item("Eggs", &ctx).await.unwrap();

        list.services
            .call(DOMAIN, SERVICE_COMPLETE_ALL, json!({}), ctx.clone(), false)
            .await
            .unwrap();
        assert!(list.items().await.unwrap().iter().all(|i| i.complete));

        list.services
            .call(DOMAIN, SERVICE_INCOMPLETE_ALL, json!({}), ctx, false)
            .await
            .unwrap();
        assert!(list.items().await.unwrap().iter().all(|i| !i.complete));
        assert_eq!(mock.mutations().len(), 6);
    }
}
