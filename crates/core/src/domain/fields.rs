// Salesforce field names and the aliases the aggregate templates assign.

pub const OBJECT: &str = "InsurancePolicy";

pub const ID: &str = "Id";
pub const SOURCE_OPPORTUNITY_ID: &str = "SourceOpportunityId";
pub const POLICY_TYPE: &str = "PolicyType";
pub const PREMIUM_AMOUNT: &str = "PremiumAmount";
pub const CREATED_DATE: &str = "CreatedDate";
pub const STATUS: &str = "Status";
pub const BUSINESS_TYPE: &str = "BusinessType__c";

pub const POLICY_COUNT: &str = "policyCount";
pub const PREMIUM_TOTAL: &str = "premiumTotal";
pub const FIRST_CREATED_DATE: &str = "firstCreatedDate";

/// Per-record metadata the REST API attaches (`type`, `url`).
pub const ATTRIBUTES: &str = "attributes";
