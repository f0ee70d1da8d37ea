//! Typed calls into the bucketing module
//!
//! Each method lowers its arguments, retains every string argument except
//! the last (lowering a later argument allocates and may trigger a
//! collection), calls the export and lifts the result. Retained arguments
//! are released when the call ends, on success or failure.

use crate::error::{BucketingError, Result};
use crate::records::{SortDirection, SortingArrayItem, TestData, SORTING_ARRAY_ID};
use crate::variable_type::{VariableType, VariableTypeCodes};
use ascbind_core::{Arg, BridgeConfig, ImportOverrides, Internref, ModuleInstance, Ptr};
use serde::{Deserialize, Serialize};

/// Runtime id of `Uint8Array` in the bucketing module.
pub const UINT8_ARRAY_ID: u32 = 9;

/// Hashes used to place a user in a target's rollout and distribution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundedHashes {
    pub rollout_hash: f64,
    pub bucketing_hash: f64,
}

fn required<T>(export: &'static str, value: Option<T>) -> Result<T> {
    value.ok_or(BucketingError::NullResult { export })
}

/// A bucketing module instance with its variable type codes resolved.
pub struct BucketingModule {
    instance: ModuleInstance,
    codes: VariableTypeCodes,
}

impl BucketingModule {
    pub fn instantiate(binary: &[u8], overrides: ImportOverrides, config: BridgeConfig) -> Result<Self> {
        Self::from_instance(ModuleInstance::instantiate(binary, overrides, config)?)
    }

    pub fn from_instance(instance: ModuleInstance) -> Result<Self> {
        let codes = VariableTypeCodes::read(&instance)?;
        tracing::debug!(?codes, "resolved variable type codes");
        Ok(Self { instance, codes })
    }

    pub fn instance(&self) -> &ModuleInstance {
        &self.instance
    }

    pub fn instance_mut(&mut self) -> &mut ModuleInstance {
        &mut self.instance
    }

    pub fn into_instance(self) -> ModuleInstance {
        self.instance
    }

    pub fn variable_type_codes(&self) -> VariableTypeCodes {
        self.codes
    }

    /// The module's own list of variable type names.
    pub fn variable_type_strings(&mut self) -> Result<Vec<String>> {
        let names = self.instance.lift_global_array::<String>("VariableTypeStrings")?;
        required("VariableTypeStrings", names)
    }

    pub fn generate_bounded_hashes(&mut self, user_id: &str, target_id: &str) -> Result<BoundedHashes> {
        const EXPORT: &str = "generateBoundedHashesFromJSON";
        let json = self.instance.scoped(|s| {
            let user_id = s.retained_string("user_id", Some(user_id))?;
            let target_id = s.required_string("target_id", Some(target_id))?;
            let out: i32 = s.call(EXPORT, (user_id.to_abi(), target_id.to_abi()))?;
            s.lift_string(Ptr::from_abi(out))
        })?;
        let json = required(EXPORT, json)?;
        serde_json::from_str(&json).map_err(|source| BucketingError::Json { export: EXPORT, source })
    }

    pub fn generate_bucketed_config_for_user(&mut self, sdk_key: &str, user: &str) -> Result<String> {
        const EXPORT: &str = "generateBucketedConfigForUser";
        let config = self.instance.scoped(|s| {
            let sdk_key = s.retained_string("sdkKey", Some(sdk_key))?;
            let user = s.required_string("userStr", Some(user))?;
            let out: i32 = s.call(EXPORT, (sdk_key.to_abi(), user.to_abi()))?;
            s.lift_string(Ptr::from_abi(out))
        })?;
        required(EXPORT, config)
    }

    /// Evaluate a variable from a protobuf-encoded request. `None` when the
    /// variable does not apply to the user.
    pub fn variable_for_user_pb(&mut self, request: &[u8]) -> Result<Option<Vec<u8>>> {
        self.bytes_call("variableForUser_PB", request)
    }

    /// `Uint8Array` in, `Uint8Array` out.
    fn bytes_call(&mut self, export: &'static str, bytes: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.instance.scoped(|s| {
            let bytes = s.typed_array(Some(bytes), UINT8_ARRAY_ID)?;
            let out: i32 = s.call(export, bytes.to_abi())?;
            s.lift_typed_array::<u8>(Ptr::from_abi(out))
        })?)
    }

    /// Evaluate a variable as JSON. `None` when the variable does not apply
    /// to the user.
    pub fn variable_for_user(
        &mut self,
        sdk_key: &str,
        user: &str,
        variable_key: &str,
        variable_type: VariableType,
        track_event: bool,
    ) -> Result<Option<String>> {
        let code = self.codes.code(variable_type);
        Ok(self.instance.scoped(|s| {
            let sdk_key = s.retained_string("sdkKey", Some(sdk_key))?;
            let user = s.retained_string("userStr", Some(user))?;
            let key = s.required_string("variableKey", Some(variable_key))?;
            let out: i32 = s.call(
                "variableForUser",
                (sdk_key.to_abi(), user.to_abi(), key.to_abi(), code, track_event as i32),
            )?;
            s.lift_string(Ptr::from_abi(out))
        })?)
    }

    /// Like [`variable_for_user`](Self::variable_for_user), for callers that
    /// already know the UTF-16 lengths of the user and key.
    pub fn variable_for_user_preallocated(
        &mut self,
        sdk_key: &str,
        user: &str,
        variable_key: &str,
        variable_type: VariableType,
        track_event: bool,
    ) -> Result<Option<String>> {
        let code = self.codes.code(variable_type);
        let user_len = user.encode_utf16().count() as i32;
        let key_len = variable_key.encode_utf16().count() as i32;
        Ok(self.instance.scoped(|s| {
            let sdk_key = s.retained_string("sdkKey", Some(sdk_key))?;
            let user = s.retained_string("userStr", Some(user))?;
            let key = s.required_string("variableKey", Some(variable_key))?;
            let out: i32 = s.call(
                "variableForUserPreallocated",
                (
                    sdk_key.to_abi(),
                    user.to_abi(),
                    user_len,
                    key.to_abi(),
                    key_len,
                    code,
                    track_event as i32,
                ),
            )?;
            s.lift_string(Ptr::from_abi(out))
        })?)
    }

    pub fn set_platform_data(&mut self, platform_data: &str) -> Result<()> {
        Ok(self.instance.scoped(|s| {
            let data = s.required_string("platformDataStr", Some(platform_data))?;
            s.call("setPlatformData", data.to_abi())
        })?)
    }

    pub fn clear_platform_data(&mut self, empty: Arg<&str>) -> Result<()> {
        let argc = empty.arity();
        Ok(self.instance.scoped(|s| {
            let empty = s.string(empty.value())?;
            s.call_with_arity("clearPlatformData", argc, empty.to_abi())
        })?)
    }

    pub fn set_config_data(&mut self, sdk_key: &str, config: &str) -> Result<()> {
        Ok(self.instance.scoped(|s| {
            let sdk_key = s.retained_string("sdkKey", Some(sdk_key))?;
            let config = s.required_string("configDataStr", Some(config))?;
            s.call("setConfigData", (sdk_key.to_abi(), config.to_abi()))
        })?)
    }

    pub fn set_config_data_with_etag(&mut self, sdk_key: &str, config: &str, etag: &str) -> Result<()> {
        Ok(self.instance.scoped(|s| {
            let sdk_key = s.retained_string("sdkKey", Some(sdk_key))?;
            let config = s.retained_string("configDataStr", Some(config))?;
            let etag = s.required_string("etag", Some(etag))?;
            s.call(
                "setConfigDataWithEtag",
                (sdk_key.to_abi(), config.to_abi(), etag.to_abi()),
            )
        })?)
    }

    pub fn has_config_data_for_etag(&mut self, sdk_key: &str, etag: &str) -> Result<bool> {
        let found: i32 = self.instance.scoped(|s| {
            let sdk_key = s.retained_string("sdkKey", Some(sdk_key))?;
            let etag = s.required_string("etag", Some(etag))?;
            s.call("hasConfigDataForEtag", (sdk_key.to_abi(), etag.to_abi()))
        })?;
        Ok(found != 0)
    }

    pub fn set_client_custom_data(&mut self, sdk_key: &str, data: &serde_json::Value) -> Result<()> {
        const EXPORT: &str = "setClientCustomData";
        let data = serde_json::to_string(data).map_err(|source| BucketingError::Json { export: EXPORT, source })?;
        Ok(self.instance.scoped(|s| {
            let sdk_key = s.retained_string("sdkKey", Some(sdk_key))?;
            let data = s.required_string("data", Some(&data))?;
            s.call(EXPORT, (sdk_key.to_abi(), data.to_abi()))
        })?)
    }

    pub fn murmurhash_v3(&mut self, key: &str, seed: u32) -> Result<u32> {
        let hash: i32 = self.instance.scoped(|s| {
            let key = s.required_string("key", Some(key))?;
            s.call("murmurhashV3", (key.to_abi(), seed as i32))
        })?;
        Ok(hash as u32)
    }

    /// The hash as the module formats it for JavaScript callers.
    pub fn murmurhash_v3_js(&mut self, key: &str, seed: u32) -> Result<String> {
        const EXPORT: &str = "murmurhashV3_js";
        let hash = self.instance.scoped(|s| {
            let key = s.required_string("key", Some(key))?;
            let out: i32 = s.call(EXPORT, (key.to_abi(), seed as i32))?;
            s.lift_string(Ptr::from_abi(out))
        })?;
        required(EXPORT, hash)
    }

    pub fn init_event_queue(&mut self, sdk_key: &str, options: &str) -> Result<()> {
        Ok(self.instance.scoped(|s| {
            let sdk_key = s.retained_string("sdkKey", Some(sdk_key))?;
            let options = s.required_string("optionsStr", Some(options))?;
            s.call("initEventQueue", (sdk_key.to_abi(), options.to_abi()))
        })?)
    }

    /// Take the queued events as serialized payloads.
    pub fn flush_event_queue(&mut self, sdk_key: &str) -> Result<String> {
        const EXPORT: &str = "flushEventQueue";
        let payloads = self.instance.scoped(|s| {
            let sdk_key = s.required_string("sdkKey", Some(sdk_key))?;
            let out: i32 = s.call(EXPORT, sdk_key.to_abi())?;
            s.lift_string(Ptr::from_abi(out))
        })?;
        required(EXPORT, payloads)
    }

    pub fn on_payload_success(&mut self, sdk_key: &str, payload_id: &str) -> Result<()> {
        Ok(self.instance.scoped(|s| {
            let sdk_key = s.retained_string("sdkKey", Some(sdk_key))?;
            let payload_id = s.required_string("payloadId", Some(payload_id))?;
            s.call("onPayloadSuccess", (sdk_key.to_abi(), payload_id.to_abi()))
        })?)
    }

    pub fn on_payload_failure(&mut self, sdk_key: &str, payload_id: &str, retryable: bool) -> Result<()> {
        Ok(self.instance.scoped(|s| {
            let sdk_key = s.retained_string("sdkKey", Some(sdk_key))?;
            let payload_id = s.required_string("payloadId", Some(payload_id))?;
            s.call(
                "onPayloadFailure",
                (sdk_key.to_abi(), payload_id.to_abi(), retryable as i32),
            )
        })?)
    }

    pub fn queue_event(&mut self, sdk_key: &str, user: &str, event: &str) -> Result<()> {
        Ok(self.instance.scoped(|s| {
            let sdk_key = s.retained_string("sdkKey", Some(sdk_key))?;
            let user = s.retained_string("userStr", Some(user))?;
            let event = s.required_string("eventStr", Some(event))?;
            s.call("queueEvent", (sdk_key.to_abi(), user.to_abi(), event.to_abi()))
        })?)
    }

    pub fn queue_aggregate_event(
        &mut self,
        sdk_key: &str,
        event: &str,
        variable_variation_map: &str,
    ) -> Result<()> {
        Ok(self.instance.scoped(|s| {
            let sdk_key = s.retained_string("sdkKey", Some(sdk_key))?;
            let event = s.retained_string("eventStr", Some(event))?;
            let map = s.required_string("variableVariationMapStr", Some(variable_variation_map))?;
            s.call("queueAggregateEvent", (sdk_key.to_abi(), event.to_abi(), map.to_abi()))
        })?)
    }

    pub fn queue_variable_evaluated_event_json(
        &mut self,
        sdk_key: &str,
        variable_variation_map: &str,
        variable: Option<&str>,
        variable_key: &str,
    ) -> Result<()> {
        Ok(self.instance.scoped(|s| {
            let sdk_key = s.retained_string("sdkKey", Some(sdk_key))?;
            let map = s.retained_string("varVariationMapString", Some(variable_variation_map))?;
            let variable = s.string(variable)?;
            let variable = s.retain(variable)?;
            let key = s.required_string("variableKey", Some(variable_key))?;
            s.call(
                "queueVariableEvaluatedEvent_JSON",
                (sdk_key.to_abi(), map.to_abi(), variable.to_abi(), key.to_abi()),
            )
        })?)
    }

    /// Queue an evaluation event for objects the module handed out earlier.
    pub fn queue_variable_evaluated_event(
        &mut self,
        sdk_key: &str,
        variable_variation_map: &Internref,
        variable: Option<&Internref>,
        variable_key: &str,
    ) -> Result<()> {
        Ok(self.instance.scoped(|s| {
            let sdk_key = s.retained_string("sdkKey", Some(sdk_key))?;
            let map = s.required("variableVariationMap", Some(variable_variation_map))?;
            let map = s.retain(map)?;
            let variable = s.managed(variable)?;
            let variable = s.retain(variable)?;
            let key = s.required_string("variableKey", Some(variable_key))?;
            s.call(
                "queueVariableEvaluatedEvent",
                (sdk_key.to_abi(), map.to_abi(), variable.to_abi(), key.to_abi()),
            )
        })?)
    }

    pub fn cleanup_event_queue(&mut self, sdk_key: &str) -> Result<()> {
        Ok(self.instance.scoped(|s| {
            let sdk_key = s.required_string("sdkKey", Some(sdk_key))?;
            s.call("cleanupEventQueue", sdk_key.to_abi())
        })?)
    }

    pub fn event_queue_size(&mut self, sdk_key: &str) -> Result<i32> {
        Ok(self.instance.scoped(|s| {
            let sdk_key = s.required_string("sdkKey", Some(sdk_key))?;
            s.call("eventQueueSize", sdk_key.to_abi())
        })?)
    }

    pub fn check_numbers_filter(&mut self, number: &str, filter: &str) -> Result<bool> {
        let passed: i32 = self.instance.scoped(|s| {
            let number = s.retained_string("number", Some(number))?;
            let filter = s.required_string("filterStr", Some(filter))?;
            s.call("checkNumbersFilterFromJSON", (number.to_abi(), filter.to_abi()))
        })?;
        Ok(passed != 0)
    }

    pub fn check_version_filters(&mut self, app_version: Option<&str>, filter: &str) -> Result<bool> {
        let passed: i32 = self.instance.scoped(|s| {
            let version = s.string(app_version)?;
            let version = s.retain(version)?;
            let filter = s.required_string("filterStr", Some(filter))?;
            s.call("checkVersionFiltersFromJSON", (version.to_abi(), filter.to_abi()))
        })?;
        Ok(passed != 0)
    }

    pub fn check_custom_data(&mut self, data: Option<&str>, filter: &str) -> Result<bool> {
        let passed: i32 = self.instance.scoped(|s| {
            let data = s.string(data)?;
            let data = s.retain(data)?;
            let filter = s.required_string("filterStr", Some(filter))?;
            s.call("checkCustomDataFromJSON", (data.to_abi(), filter.to_abi()))
        })?;
        Ok(passed != 0)
    }

    /// Evaluate an audience operator. Omitting `audiences` leaves the
    /// module's default in place; `Arg::Null` passes null explicitly.
    pub fn evaluate_operator(&mut self, operator: &str, user: &str, audiences: Arg<&str>) -> Result<bool> {
        let argc = 2 + audiences.arity();
        let passed: i32 = self.instance.scoped(|s| {
            let operator = s.retained_string("operatorStr", Some(operator))?;
            let user = s.retained_string("userStr", Some(user))?;
            let audiences = s.string(audiences.value())?;
            s.call_with_arity(
                "evaluateOperatorFromJSON",
                argc,
                (operator.to_abi(), user.to_abi(), audiences.to_abi()),
            )
        })?;
        Ok(passed != 0)
    }

    pub fn decide_target_variation(&mut self, target: &str, bounded_hash: f64) -> Result<String> {
        const EXPORT: &str = "decideTargetVariationFromJSON";
        let variation = self.instance.scoped(|s| {
            let target = s.required_string("targetStr", Some(target))?;
            let out: i32 = s.call(EXPORT, (target.to_abi(), bounded_hash))?;
            s.lift_string(Ptr::from_abi(out))
        })?;
        required(EXPORT, variation)
    }

    pub fn does_user_pass_rollout(&mut self, rollout: Option<&str>, bounded_hash: f64) -> Result<bool> {
        let passed: i32 = self.instance.scoped(|s| {
            let rollout = s.string(rollout)?;
            s.call("doesUserPassRolloutFromJSON", (rollout.to_abi(), bounded_hash))
        })?;
        Ok(passed != 0)
    }

    /// Order `items` by their `value`, returning the entries.
    pub fn sort_objects_by_string(
        &mut self,
        items: &[SortingArrayItem],
        direction: SortDirection,
    ) -> Result<Vec<TestData>> {
        const EXPORT: &str = "testSortObjectsByString";
        let sorted = self.instance.scoped(|s| {
            let items = s.managed_array(Some(items), SORTING_ARRAY_ID)?;
            let items = s.retain(items)?;
            let direction = s.required_string("direction", Some(direction.as_str()))?;
            let out: i32 = s.call(EXPORT, (items.to_abi(), direction.to_abi()))?;
            s.lift_managed_array::<TestData>(Ptr::from_abi(out))
        })?;
        required(EXPORT, sorted)
    }

    /// Parse a config body in the module and serialise it back.
    pub fn test_config_body_class(&mut self, config: &str, etag: Arg<&str>) -> Result<String> {
        const EXPORT: &str = "testConfigBodyClass";
        let argc = 1 + etag.arity();
        let body = self.instance.scoped(|s| {
            let config = s.retained_string("configStr", Some(config))?;
            let etag = s.string(etag.value())?;
            let out: i32 = s.call_with_arity(EXPORT, argc, (config.to_abi(), etag.to_abi()))?;
            s.lift_string(Ptr::from_abi(out))
        })?;
        required(EXPORT, body)
    }

    pub fn test_variable_for_user_params_pb(&mut self, params: &[u8]) -> Result<Option<Vec<u8>>> {
        self.bytes_call("testVariableForUserParams_PB", params)
    }

    pub fn test_dvc_user_pb(&mut self, user: &[u8]) -> Result<Option<Vec<u8>>> {
        self.bytes_call("testDVCUser_PB", user)
    }

    pub fn test_sdk_variable_pb(&mut self, variable: &[u8]) -> Result<Option<Vec<u8>>> {
        self.bytes_call("testSDKVariable_PB", variable)
    }

    pub fn test_dvc_user_class(&mut self, user: &str) -> Result<String> {
        self.json_class("testDVCUserClass", "userStr", user)
    }

    pub fn test_bucketed_user_config_class(&mut self, user_config: &str) -> Result<String> {
        self.json_class("testBucketedUserConfigClass", "userConfigStr", user_config)
    }

    pub fn test_event_queue_options_class(&mut self, options: &str) -> Result<String> {
        self.json_class("testEventQueueOptionsClass", "optionsStr", options)
    }

    pub fn test_dvc_event_class(&mut self, event: &str) -> Result<String> {
        self.json_class("testDVCEventClass", "eventStr", event)
    }

    pub fn test_platform_data_class(&mut self, data: &str) -> Result<String> {
        self.json_class("testPlatformDataClass", "dataStr", data)
    }

    pub fn test_dvc_request_event_class(
        &mut self,
        event: &str,
        user_id: &str,
        feature_vars: &str,
    ) -> Result<String> {
        const EXPORT: &str = "testDVCRequestEventClass";
        let request = self.instance.scoped(|s| {
            let event = s.retained_string("eventStr", Some(event))?;
            let user_id = s.retained_string("user_id", Some(user_id))?;
            let feature_vars = s.required_string("featureVarsStr", Some(feature_vars))?;
            let out: i32 = s.call(EXPORT, (event.to_abi(), user_id.to_abi(), feature_vars.to_abi()))?;
            s.lift_string(Ptr::from_abi(out))
        })?;
        required(EXPORT, request)
    }

    /// One JSON string in, the module's re-serialisation out.
    fn json_class(&mut self, export: &'static str, argument: &'static str, json: &str) -> Result<String> {
        let out = self.instance.scoped(|s| {
            let json = s.required_string(argument, Some(json))?;
            let out: i32 = s.call(export, json.to_abi())?;
            s.lift_string(Ptr::from_abi(out))
        })?;
        required(export, out)
    }
}

impl std::fmt::Debug for BucketingModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketingModule")
            .field("instance", &self.instance)
            .field("codes", &self.codes)
            .finish()
    }
}
